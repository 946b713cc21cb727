//! Data facade
//!
//! The single surface tool code talks to. Routing rules:
//!
//! - The backend is chosen once, at open, by probing the primary medium. If
//!   it cannot be opened the session runs on the fallback medium.
//! - A medium failure on the primary (I/O, quota, version conflict) switches
//!   the session to the fallback for good and the operation is retried there.
//! - Data-level failures are not medium failures. A corrupted record is
//!   logged and counted, then the fallback is consulted. Unknown stores and
//!   unique-index violations fail the call without a retry.
//! - All operations are serialized by one async mutex, so each is atomic and
//!   concurrent writes to one key resolve last-write-wins.

mod autosave;
mod data;
mod notify;

pub use autosave::AutoSaver;
pub use data::{CasOutcome, DataFacade};
pub use notify::{LogNotifier, MemoryNotifier, Notification, NotificationSeverity, Notifier};
