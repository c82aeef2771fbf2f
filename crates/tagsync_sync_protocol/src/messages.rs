//! Protocol messages.
//!
//! Bodies are CBOR. Chunk bodies themselves are raw bytes.

use crate::error::{ProtocolError, ProtocolResult};
use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use tagsync_codec::{from_cbor, to_cbor};

/// HTTP status for a successful request.
pub const STATUS_OK: u16 = 200;
/// HTTP status returned when the server copy moved past the upload's base.
pub const STATUS_CONFLICT: u16 = 409;
/// HTTP status for an unknown path.
pub const STATUS_NOT_FOUND: u16 = 404;

/// How the stored bytes of an item relate to its payload.
///
/// Chosen by the uploader and kept by the server, so the downloader never
/// has to guess from the bytes themselves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Encoding {
    /// Stored bytes are the payload.
    #[default]
    Raw,
    /// Stored bytes are one zstd frame of the payload.
    Zstd,
}

impl Encoding {
    /// Query parameter value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Raw => "raw",
            Encoding::Zstd => "zstd",
        }
    }

    /// Parses a query parameter value.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "raw" => Some(Encoding::Raw),
            "zstd" => Some(Encoding::Zstd),
            _ => None,
        }
    }
}

/// Metadata of a stored item, answered by the info endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemInfo {
    /// Item path.
    pub path: String,
    /// Stored size in bytes (possibly compressed).
    pub size: u64,
    /// Server version.
    pub version: u64,
    /// SHA-256 of the stored bytes.
    pub hash: ContentHash,
    /// Encoding of the stored bytes.
    #[serde(default)]
    pub encoding: Encoding,
}

impl ItemInfo {
    /// Describes `stored` under `path` at `version`.
    pub fn describe(
        path: impl Into<String>,
        version: u64,
        stored: &[u8],
        encoding: Encoding,
    ) -> Self {
        Self {
            path: path.into(),
            size: stored.len() as u64,
            version,
            hash: ContentHash::of(stored),
            encoding,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(to_cbor(self)?)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(from_cbor(bytes)?)
    }
}

/// Answer to the final chunk of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    /// Version assigned to the stored item.
    pub version: u64,
}

impl UploadReceipt {
    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(to_cbor(self)?)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(from_cbor(bytes)?)
    }
}

/// A byte range of an item moved in one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    /// Start offset.
    pub offset: usize,
    /// Length in bytes.
    pub size: usize,
}

impl ChunkRange {
    /// End offset (exclusive).
    pub fn end(&self) -> usize {
        self.offset + self.size
    }

    /// Splits `total` bytes into consecutive ranges of at most `chunk_size`.
    ///
    /// A zero-length item yields no ranges.
    ///
    /// # Errors
    ///
    /// Returns an error if `chunk_size` is zero.
    pub fn plan(total: usize, chunk_size: usize) -> ProtocolResult<Vec<ChunkRange>> {
        if chunk_size == 0 {
            return Err(ProtocolError::invalid("chunk size must be positive"));
        }
        Ok((0..total)
            .step_by(chunk_size)
            .map(|offset| ChunkRange {
                offset,
                size: chunk_size.min(total - offset),
            })
            .collect())
    }
}
