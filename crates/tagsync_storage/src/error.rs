//! Error types for snapshot storage.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while loading or replacing a snapshot.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The stored blob is unusable.
    #[error("snapshot corrupted: {0}")]
    Corrupted(String),
}
