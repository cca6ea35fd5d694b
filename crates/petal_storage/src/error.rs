//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// An append does not fit into a fixed-capacity backend.
    #[error("capacity exceeded: need {needed} bytes, capacity {capacity}")]
    CapacityExceeded {
        /// Size the storage would reach after the append.
        needed: u64,
        /// Fixed capacity of the backend.
        capacity: u64,
    },

    /// The storage file is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// The storage is closed.
    #[error("storage is closed")]
    Closed,
}

impl StorageError {
    /// Creates an invalid-truncate error.
    pub(crate) fn truncate_past_end(new_size: u64, size: u64) -> Self {
        Self::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("cannot truncate to size {new_size} which is greater than current size {size}"),
        ))
    }
}
