//! Schema registry errors

use thiserror::Error;

/// Result type for schema registry operations
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors raised while declaring stores and indexes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("invalid store name '{0}': expected 1-64 chars of [A-Za-z0-9_-]")]
    InvalidStoreName(String),

    #[error("store already registered: {0}")]
    DuplicateStore(String),

    #[error("unknown store: {0}")]
    UnknownStore(String),

    #[error("index '{index}' already declared on store '{store}'")]
    DuplicateIndex { store: String, index: String },

    #[error("invalid key path '{0}'")]
    InvalidKeyPath(String),

    #[error("schema version must increase: current {current}, requested {requested}")]
    VersionNotIncreasing { current: u32, requested: u32 },
}
