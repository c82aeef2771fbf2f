//! Error types for the metric cache and batch pipeline.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the cache or the pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The structure is full; the producer must back off.
    #[error("capacity exceeded: {capacity} entries")]
    CapacityExceeded {
        /// Configured capacity.
        capacity: usize,
    },

    /// Nothing to process or upload.
    #[error("batch is empty")]
    BatchEmpty,

    /// `upload_batch` was called without an uploader.
    #[error("no uploader configured")]
    NoUploader,

    /// A processor callback rejected an item; the rest of the pass was skipped.
    #[error("processor rejected item {id}: {message}")]
    CallbackFailure {
        /// Item that failed.
        id: u32,
        /// Reason given by the processor.
        message: String,
    },

    /// The uploader rejected the batch; it is kept for retry.
    #[error("upload failed: {0}")]
    UploadFailed(String),

    /// The component lock could not be taken within the configured timeout.
    #[error("timed out waiting for the {component} lock")]
    LockTimeout {
        /// Component whose lock is held.
        component: &'static str,
    },

    /// A background thread could not be started.
    #[error("failed to spawn worker {name}: {message}")]
    WorkerSpawn {
        /// Thread name.
        name: String,
        /// OS error text.
        message: String,
    },

    /// Encoding error.
    #[error(transparent)]
    Codec(#[from] tagsync_codec::CodecError),
}

impl CoreError {
    /// Creates a callback failure.
    pub fn callback(id: u32, message: impl Into<String>) -> Self {
        Self::CallbackFailure {
            id,
            message: message.into(),
        }
    }

    /// Creates an upload failure.
    pub fn upload(message: impl Into<String>) -> Self {
        Self::UploadFailed(message.into())
    }

    /// Returns true if the caller should back off and try again later.
    pub fn is_backpressure(&self) -> bool {
        matches!(
            self,
            CoreError::CapacityExceeded { .. } | CoreError::LockTimeout { .. }
        )
    }
}
