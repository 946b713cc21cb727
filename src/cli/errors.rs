//! CLI-specific error types
//!
//! A CLI error ends the process with a non-zero status.

use std::fmt;
use std::io;

use crate::config::ConfigError;
use crate::migration::MigrationError;
use crate::transfer::TransferError;

/// CLI error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file error
    ConfigError,
    /// I/O error (stdin/stdout, bundle files)
    IoError,
    /// Configuration file already exists
    AlreadyInitialized,
    /// Malformed command input
    InvalidInput,
    /// The facade reported failure
    OperationFailed,
    /// Bundle failed validation; nothing was imported
    ImportRejected,
    /// Migration stopped before completing
    MigrationFailed,
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "TOOLSTORE_CLI_CONFIG_ERROR",
            Self::IoError => "TOOLSTORE_CLI_IO_ERROR",
            Self::AlreadyInitialized => "TOOLSTORE_CLI_ALREADY_INITIALIZED",
            Self::InvalidInput => "TOOLSTORE_CLI_INVALID_INPUT",
            Self::OperationFailed => "TOOLSTORE_CLI_OPERATION_FAILED",
            Self::ImportRejected => "TOOLSTORE_CLI_IMPORT_REJECTED",
            Self::MigrationFailed => "TOOLSTORE_CLI_MIGRATION_FAILED",
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    /// Create a new CLI error
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Config error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    /// I/O error
    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    /// Configuration file already exists
    pub fn already_initialized(path: &std::path::Path) -> Self {
        Self::new(
            CliErrorCode::AlreadyInitialized,
            format!("Configuration already exists at {}", path.display()),
        )
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::InvalidInput, msg)
    }

    pub fn operation_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::OperationFailed, msg)
    }

    /// Get the error code
    pub fn code(&self) -> CliErrorCode {
        self.code
    }

    /// Get the error code string
    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::invalid_input(format!("JSON error: {}", e))
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        Self::config_error(e.to_string())
    }
}

impl From<TransferError> for CliError {
    fn from(e: TransferError) -> Self {
        let code = match e {
            TransferError::ImportValidation(_) => CliErrorCode::ImportRejected,
            TransferError::Io { .. } => CliErrorCode::IoError,
            TransferError::Json(_) => CliErrorCode::InvalidInput,
        };
        Self::new(code, e.to_string())
    }
}

impl From<MigrationError> for CliError {
    fn from(e: MigrationError) -> Self {
        Self::new(CliErrorCode::MigrationFailed, e.to_string())
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_error_mapping() {
        let err: CliError = TransferError::ImportValidation("missing field 'version'".into()).into();
        assert_eq!(err.code(), CliErrorCode::ImportRejected);
        assert_eq!(err.code_str(), "TOOLSTORE_CLI_IMPORT_REJECTED");
    }

    #[test]
    fn test_display_includes_code() {
        let err = CliError::operation_failed("save failed");
        assert_eq!(err.to_string(), "TOOLSTORE_CLI_OPERATION_FAILED: save failed");
    }
}
