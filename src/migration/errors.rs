//! Migration errors
//!
//! A [`MigrationItemError`] concerns one legacy record and never aborts the
//! batch. A [`MigrationError`] stops the run.

use serde::Serialize;
use thiserror::Error;

/// Result type for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MigrationError {
    #[error("forbidden migration transition: {from} -> {to}")]
    ForbiddenTransition { from: &'static str, to: &'static str },

    #[error("migration state record is unreadable: {0}")]
    StateUnreadable(String),

    #[error("failed to persist migration state in phase {0}")]
    StatePersistFailed(&'static str),

    #[error("migration claim was taken over while in phase {0}")]
    ClaimLost(&'static str),

    #[error("migration task ended abnormally: {0}")]
    TaskAborted(String),
}

/// One legacy record that could not be migrated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{source_name}: {store}/{key}: {reason}")]
pub struct MigrationItemError {
    /// Legacy source the record came from
    pub source_name: String,
    pub store: String,
    pub key: String,
    pub reason: String,
}

impl MigrationItemError {
    pub fn new(
        source_name: impl Into<String>,
        store: impl Into<String>,
        key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            store: store.into(),
            key: key.into(),
            reason: reason.into(),
        }
    }
}
