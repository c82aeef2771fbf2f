//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding, decoding or compression.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode a value to CBOR.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode CBOR bytes.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// The compressor rejected the input.
    #[error("compression failed: {message}")]
    CompressionFailed {
        /// Description of the compression error.
        message: String,
    },

    /// Compressed input was truncated or malformed.
    #[error("decompression failed: {message}")]
    DecompressionFailed {
        /// Description of the decompression error.
        message: String,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Create a compression failed error.
    pub fn compression_failed(message: impl Into<String>) -> Self {
        Self::CompressionFailed {
            message: message.into(),
        }
    }

    /// Create a decompression failed error.
    pub fn decompression_failed(message: impl Into<String>) -> Self {
        Self::DecompressionFailed {
            message: message.into(),
        }
    }
}
