//! Export/import errors

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for export/import operations
pub type TransferResult<T> = Result<T, TransferError>;

#[derive(Debug, Error)]
pub enum TransferError {
    /// The bundle failed validation; nothing was written
    #[error("import rejected: {0}")]
    ImportValidation(String),

    #[error("bundle file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("bundle JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl TransferError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        TransferError::ImportValidation(reason.into())
    }

    pub(crate) fn io(path: &std::path::Path, source: io::Error) -> Self {
        TransferError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Returns whether the error is a validation rejection
    pub fn is_rejection(&self) -> bool {
        matches!(self, TransferError::ImportValidation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_display() {
        let err = TransferError::invalid("missing field 'version'");
        assert!(err.is_rejection());
        assert_eq!(err.to_string(), "import rejected: missing field 'version'");
    }
}
