//! Storage error types
//!
//! Error codes:
//! - TOOLSTORE_STORAGE_OPEN_FAILED (ERROR) - primary medium unusable
//! - TOOLSTORE_STORAGE_WRITE_FAILED (ERROR)
//! - TOOLSTORE_STORAGE_READ_FAILED (ERROR)
//! - TOOLSTORE_STORAGE_IO_ERROR (ERROR)
//! - TOOLSTORE_STORAGE_QUOTA_EXCEEDED (ERROR)
//! - TOOLSTORE_STORAGE_VERSION_CONFLICT (ERROR)
//! - TOOLSTORE_DATA_CORRUPTION (WARNING) - checksum mismatch, payload withheld
//! - TOOLSTORE_UNKNOWN_STORE (ERROR)
//! - TOOLSTORE_UNKNOWN_INDEX (ERROR)
//! - TOOLSTORE_CONSTRAINT_VIOLATION (ERROR)

use std::fmt;
use std::io;

/// Severity levels for storage errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Data-level problem, the medium itself is fine
    Warning,
    /// Operation failed
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// Storage-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorCode {
    /// Database could not be opened, upgraded or probed
    OpenFailed,
    /// Record write failed
    WriteFailed,
    /// Record read failed
    ReadFailed,
    /// Other I/O failure
    IoError,
    /// Medium is full
    QuotaExceeded,
    /// On-disk schema version is newer than the declared one
    VersionConflict,
    /// Checksum mismatch or structurally damaged record
    DataCorruption,
    /// Store is not declared
    UnknownStore,
    /// Index is not declared on the store
    UnknownIndex,
    /// Unique index violated
    ConstraintViolation,
}

impl StorageErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            StorageErrorCode::OpenFailed => "TOOLSTORE_STORAGE_OPEN_FAILED",
            StorageErrorCode::WriteFailed => "TOOLSTORE_STORAGE_WRITE_FAILED",
            StorageErrorCode::ReadFailed => "TOOLSTORE_STORAGE_READ_FAILED",
            StorageErrorCode::IoError => "TOOLSTORE_STORAGE_IO_ERROR",
            StorageErrorCode::QuotaExceeded => "TOOLSTORE_STORAGE_QUOTA_EXCEEDED",
            StorageErrorCode::VersionConflict => "TOOLSTORE_STORAGE_VERSION_CONFLICT",
            StorageErrorCode::DataCorruption => "TOOLSTORE_DATA_CORRUPTION",
            StorageErrorCode::UnknownStore => "TOOLSTORE_UNKNOWN_STORE",
            StorageErrorCode::UnknownIndex => "TOOLSTORE_UNKNOWN_INDEX",
            StorageErrorCode::ConstraintViolation => "TOOLSTORE_CONSTRAINT_VIOLATION",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            StorageErrorCode::DataCorruption => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// Whether the error means the medium itself is unusable.
    ///
    /// Medium failures move the facade onto the fallback medium; data-level
    /// errors (corruption, unknown store, constraint) do not.
    pub fn is_medium_failure(&self) -> bool {
        matches!(
            self,
            StorageErrorCode::OpenFailed
                | StorageErrorCode::WriteFailed
                | StorageErrorCode::ReadFailed
                | StorageErrorCode::IoError
                | StorageErrorCode::QuotaExceeded
                | StorageErrorCode::VersionConflict
        )
    }
}

impl fmt::Display for StorageErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Storage error with code, message and optional context
#[derive(Debug)]
pub struct StorageError {
    code: StorageErrorCode,
    message: String,
    details: Option<String>,
    source: Option<io::Error>,
}

impl StorageError {
    fn new(code: StorageErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    fn with_source(mut self, source: io::Error) -> Self {
        self.source = Some(source);
        self
    }

    fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }

    /// Primary medium failed to open
    pub fn open_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self::new(StorageErrorCode::OpenFailed, message).with_source(source)
    }

    /// Primary medium failed to open, without an I/O cause
    pub fn open_failed_no_source(message: impl Into<String>) -> Self {
        Self::new(StorageErrorCode::OpenFailed, message)
    }

    /// Write failed
    pub fn write_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self::new(StorageErrorCode::WriteFailed, message).with_source(source)
    }

    /// Write refused without an I/O cause
    pub fn write_failed_no_source(message: impl Into<String>) -> Self {
        Self::new(StorageErrorCode::WriteFailed, message)
    }

    /// Read failed
    pub fn read_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self::new(StorageErrorCode::ReadFailed, message).with_source(source)
    }

    /// Generic I/O failure
    pub fn io_error(message: impl Into<String>, source: io::Error) -> Self {
        Self::new(StorageErrorCode::IoError, message).with_source(source)
    }

    /// Write would exceed the medium's quota
    pub fn quota_exceeded(needed: u64, quota: u64) -> Self {
        Self::new(StorageErrorCode::QuotaExceeded, "Storage quota exceeded")
            .with_details(format!("needed_bytes: {}, quota_bytes: {}", needed, quota))
    }

    /// On-disk version is newer than the registry
    pub fn version_conflict(on_disk: u32, declared: u32) -> Self {
        Self::new(
            StorageErrorCode::VersionConflict,
            "Database was written by a newer schema version",
        )
        .with_details(format!("on_disk: {}, declared: {}", on_disk, declared))
    }

    /// Data corruption without further context
    pub fn data_corruption(message: impl Into<String>) -> Self {
        Self::new(StorageErrorCode::DataCorruption, message)
    }

    /// Data corruption at a byte offset of a store log
    pub fn corruption_at_offset(store: &str, offset: u64, reason: impl Into<String>) -> Self {
        Self::new(StorageErrorCode::DataCorruption, reason)
            .with_details(format!("store: {}, byte_offset: {}", store, offset))
    }

    /// Data corruption of a specific record
    pub fn corruption_for_record(store: &str, key: &str, reason: impl Into<String>) -> Self {
        Self::new(StorageErrorCode::DataCorruption, reason)
            .with_details(format!("store: {}, key: {}", store, key))
    }

    /// Store is not declared in the schema
    pub fn unknown_store(store: &str) -> Self {
        Self::new(StorageErrorCode::UnknownStore, format!("Unknown store: {}", store))
    }

    /// Index is not declared on the store
    pub fn unknown_index(store: &str, index: &str) -> Self {
        Self::new(StorageErrorCode::UnknownIndex, format!("Unknown index: {}", index))
            .with_details(format!("store: {}", store))
    }

    /// Unique index violated
    pub fn constraint_violation(store: &str, index: &str, existing_key: &str) -> Self {
        Self::new(
            StorageErrorCode::ConstraintViolation,
            format!("Unique index '{}' already holds this value", index),
        )
        .with_details(format!("store: {}, existing_key: {}", store, existing_key))
    }

    /// Returns the error code
    pub fn code(&self) -> StorageErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns additional error details
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// See [`StorageErrorCode::is_medium_failure`]
    pub fn is_medium_failure(&self) -> bool {
        self.code.is_medium_failure()
    }

    /// Returns whether this is a checksum/structure problem
    pub fn is_corruption(&self) -> bool {
        self.code == StorageErrorCode::DataCorruption
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        if let Some(ref source) = self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
