//! Record storage for the persistence layer
//!
//! Two media implement [`StorageBackend`]:
//!
//! - [`StorageEngine`], the primary medium: a versioned database directory
//!   with one append-only log per store
//! - [`FallbackStore`], the secondary medium: one flat key-value file
//!
//! # Design Principles
//!
//! - Append-only logs, latest record wins, tombstones for deletes
//! - Every write is fsynced before it is acknowledged
//! - Checksum verified on every read; a mismatch withholds the payload
//! - Stores and indexes are only ever added, never dropped
//! - Writes made on the fallback medium are replayed onto the primary
//!   medium once it opens again

mod backend;
mod engine;
mod errors;
mod fallback;
mod log;
mod manifest;
mod reconcile;
mod record;

pub use backend::{Medium, StorageBackend, StorageInfo, StoreSnapshot};
pub use engine::{StorageEngine, DEFAULT_PRIMARY_QUOTA};
pub use errors::{Severity, StorageError, StorageErrorCode, StorageResult};
pub use fallback::{
    namespaced_key, FallbackEntry, FallbackStore, Tombstone, DEFAULT_FALLBACK_QUOTA, FALLBACK_FILE,
};
pub use manifest::{DatabaseManifest, UpgradeOutcome};
pub use reconcile::{reconcile, ReconcileStats};
pub use record::{Record, RecordFrame};
