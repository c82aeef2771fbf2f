//! Error types for the sync engine.

use crate::state::SyncState;
use tagsync_codec::CodecError;
use tagsync_sync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// The remote answered a transfer request with a non-success status.
    #[error("transfer of {path} failed with status {status}")]
    Transfer {
        /// Item path.
        path: String,
        /// HTTP status.
        status: u16,
    },

    /// The HTTP client could not complete the request.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A message or URL violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A downloaded item did not match its advertised hash.
    #[error("hash mismatch for {path}")]
    HashMismatch {
        /// Item path.
        path: String,
    },

    /// The operation is not allowed in the current state.
    #[error("cannot {operation} while {from:?}")]
    InvalidStateTransition {
        /// Current state.
        from: SyncState,
        /// Attempted operation.
        operation: &'static str,
    },

    /// `resolve_conflict` named a path that is not parked.
    #[error("no parked conflict for {path}")]
    UnknownConflict {
        /// Item path.
        path: String,
    },

    /// The merger declined or a resolution could not be applied.
    #[error("merge of {path} failed: {message}")]
    MergeFailed {
        /// Item path.
        path: String,
        /// Reason.
        message: String,
    },

    /// The local store rejected an operation.
    #[error("local store error: {0}")]
    LocalStore(String),

    /// The orchestrator lock could not be taken within the configured timeout.
    #[error("timed out waiting for the orchestrator lock")]
    LockTimeout,

    /// Payload encoding, compression or CBOR failure.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The worker thread could not be started.
    #[error("failed to start sync worker: {0}")]
    WorkerSpawn(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a local store error.
    pub fn local_store(message: impl Into<String>) -> Self {
        Self::LocalStore(message.into())
    }

    /// Returns true if a later session may succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Transfer { status, .. } => *status >= 500,
            SyncError::HashMismatch { .. } | SyncError::LockTimeout => true,
            _ => false,
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Codec(e) => SyncError::Codec(e),
            other => SyncError::Protocol(other.to_string()),
        }
    }
}
