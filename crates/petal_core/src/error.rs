//! Error types for PetalDB core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in PetalDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No live entry exists for the requested key (or field, member, element).
    #[error("key not found")]
    KeyNotFound,

    /// The key exists but its TTL has elapsed.
    #[error("key expired")]
    ExpiredKey,

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] petal_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An entry failed to decode: bad length, unknown tag or truncated read.
    #[error("corrupt record: {message}")]
    CorruptRecord {
        /// Description of the corruption.
        message: String,
    },

    /// Entry checksum mismatch.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the entry header.
        expected: u32,
        /// Checksum computed over the entry bytes.
        actual: u32,
    },

    /// Startup replay hit corruption that is not an incomplete tail write.
    #[error("recovery failed: {message}")]
    RecoveryFailure {
        /// Description of the failure.
        message: String,
    },

    /// Database is already open or locked.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// Database is closed.
    #[error("database is closed")]
    DatabaseClosed,

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Invalid database layout or file name.
    #[error("invalid database format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Keys must be non-empty.
    #[error("key must not be empty")]
    EmptyKey,
}

impl CoreError {
    /// Creates a corrupt record error.
    pub fn corrupt_record(message: impl Into<String>) -> Self {
        Self::CorruptRecord {
            message: message.into(),
        }
    }

    /// Creates a recovery failure error.
    pub fn recovery_failure(message: impl Into<String>) -> Self {
        Self::RecoveryFailure {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if the error means stored bytes did not decode.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::CorruptRecord { .. } | Self::ChecksumMismatch { .. } | Self::RecoveryFailure { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corruption_classifier() {
        assert!(CoreError::corrupt_record("short header").is_corruption());
        assert!(CoreError::ChecksumMismatch {
            expected: 1,
            actual: 2
        }
        .is_corruption());
        assert!(CoreError::recovery_failure("mid-log").is_corruption());
        assert!(!CoreError::KeyNotFound.is_corruption());
        assert!(!CoreError::ExpiredKey.is_corruption());
    }

    #[test]
    fn display_messages() {
        let err = CoreError::ChecksumMismatch {
            expected: 0xdead_beef,
            actual: 0x0000_0001,
        };
        assert_eq!(
            err.to_string(),
            "checksum mismatch: expected deadbeef, got 00000001"
        );
        assert_eq!(CoreError::ExpiredKey.to_string(), "key expired");
    }

    #[test]
    fn storage_error_converts() {
        let err: CoreError = petal_storage::StorageError::Closed.into();
        assert!(matches!(err, CoreError::Storage(_)));
    }
}
