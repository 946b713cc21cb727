//! Migration of records left by earlier storage generations
//!
//! The coordinator scans legacy namespaces, rewrites what it finds through
//! the facade and records its progress in a `MigrationState` record of the
//! `system` store. Once that record says `Completed`, later runs are no-ops.

mod coordinator;
mod errors;
mod legacy;
mod state;

pub use coordinator::{MigrationCoordinator, MigrationHandle, MigrationOutcome, MigrationReport};
pub use errors::{MigrationError, MigrationItemError, MigrationResult};
pub use legacy::{transform_raw, transform_value, LegacyItem, LegacyKeyPattern, MAIN_DATA_KEY};
pub use state::{MigrationPhase, MigrationState, MIGRATION_STATE_KEY};
