//! Error types for the device runtime.

use tagsync_codec::CodecError;
use tagsync_core::CoreError;
use tagsync_storage::StorageError;
use tagsync_sync_engine::SyncError;
use thiserror::Error;

/// Result type for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors surfaced by [`Device`](crate::Device).
#[derive(Error, Debug)]
pub enum DeviceError {
    /// Cache or pipeline error.
    #[error("core: {0}")]
    Core(#[from] CoreError),

    /// Sync orchestrator error.
    #[error("sync: {0}")]
    Sync(#[from] SyncError),

    /// Snapshot store error.
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    /// Snapshot encoding error.
    #[error("codec: {0}")]
    Codec(#[from] CodecError),

    /// The snapshot was written by a newer runtime.
    #[error("snapshot format {found} is newer than supported {supported}")]
    UnsupportedSnapshot {
        /// Version found in the blob.
        found: u16,
        /// Highest version this runtime reads.
        supported: u16,
    },
}

impl DeviceError {
    /// Returns true if retrying the operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeviceError::Core(e) => e.is_backpressure(),
            DeviceError::Sync(e) => e.is_retryable(),
            DeviceError::Storage(StorageError::Io(_)) => true,
            _ => false,
        }
    }
}
