//! Chunked item transfer over an [`HttpClient`].

use crate::error::{SyncError, SyncResult};
use crate::http::{HttpClient, HttpResponse};
use std::sync::Arc;
use tagsync_sync_protocol::{
    ChunkRange, Encoding, Endpoints, ItemInfo, UploadReceipt, Url, STATUS_CONFLICT,
    STATUS_NOT_FOUND,
};
use tracing::{debug, trace};

/// Result of uploading one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The server stored the item.
    Stored(UploadReceipt),
    /// The server copy moved past the upload's base version.
    Conflict,
}

/// A fully downloaded, verified and decompressed item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloaded {
    /// Original payload.
    pub payload: Vec<u8>,
    /// Metadata the download was checked against.
    pub info: ItemInfo,
}

/// Moves whole items as sequences of fixed-size chunks.
pub struct ChunkTransport {
    client: Arc<dyn HttpClient>,
    endpoints: Endpoints,
    chunk_size: usize,
    compression_level: i32,
    max_item_size: u64,
}

impl ChunkTransport {
    /// Creates a transport.
    pub fn new(
        client: Arc<dyn HttpClient>,
        endpoints: Endpoints,
        chunk_size: usize,
        compression_level: i32,
    ) -> Self {
        Self {
            client,
            endpoints,
            chunk_size,
            compression_level,
            max_item_size: crate::config::DEFAULT_MAX_ITEM_SIZE,
        }
    }

    /// Refuses downloads whose advertised size exceeds `max` bytes.
    pub fn with_max_item_size(mut self, max: u64) -> Self {
        self.max_item_size = max;
        self
    }

    /// Returns the endpoints in use.
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    fn get(&self, url: &Url) -> SyncResult<HttpResponse> {
        self.client.get(url).map_err(SyncError::transport_retryable)
    }

    fn post(&self, url: &Url, body: &[u8]) -> SyncResult<HttpResponse> {
        self.client
            .post(url, body)
            .map_err(SyncError::transport_retryable)
    }

    /// Uploads `payload` as a new version of `path` based on `base_version`.
    ///
    /// The payload is compressed when that makes it strictly smaller, and
    /// every chunk carries the resulting [`Encoding`]. Chunks
    /// are sent in order and the first non-success status aborts the item;
    /// a `409` on the first chunk is reported as [`UploadOutcome::Conflict`].
    ///
    /// # Errors
    ///
    /// - [`SyncError::Transport`] if a request got no response
    /// - [`SyncError::Transfer`] on any other non-success status
    /// - [`SyncError::Codec`] if compression or the receipt fails
    pub fn upload(&self, path: &str, payload: &[u8], base_version: u64) -> SyncResult<UploadOutcome> {
        let (body, encoding) =
            match tagsync_codec::compress_if_smaller(payload, self.compression_level)? {
                Some(packed) => (packed, Encoding::Zstd),
                None => (payload.to_vec(), Encoding::Raw),
            };
        let total = body.len();

        let mut ranges = ChunkRange::plan(total, self.chunk_size)?;
        if ranges.is_empty() {
            ranges.push(ChunkRange { offset: 0, size: 0 });
        }
        let last = ranges.len() - 1;

        debug!(
            path,
            size = payload.len(),
            stored = total,
            encoding = encoding.as_str(),
            chunks = ranges.len(),
            "uploading"
        );

        for (index, range) in ranges.into_iter().enumerate() {
            let url = self.endpoints.upload(path, range, total, base_version, encoding)?;
            let response = self.post(&url, &body[range.offset..range.end()])?;

            if index == 0 && response.status == STATUS_CONFLICT {
                debug!(path, base_version, "upload rejected as conflict");
                return Ok(UploadOutcome::Conflict);
            }
            if !response.is_success() {
                return Err(SyncError::Transfer {
                    path: path.to_string(),
                    status: response.status,
                });
            }
            trace!(path, offset = range.offset, size = range.size, "chunk sent");

            if index == last {
                let receipt = UploadReceipt::decode(&response.body)?;
                return Ok(UploadOutcome::Stored(receipt));
            }
        }

        Err(SyncError::Protocol(format!("upload of {path} sent no chunks")))
    }

    /// Fetches the metadata of `path`, or `None` if the server lacks it.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, an unexpected status, or an
    /// undecodable body.
    pub fn info(&self, path: &str) -> SyncResult<Option<ItemInfo>> {
        let response = self.get(&self.endpoints.info(path)?)?;
        if response.status == STATUS_NOT_FOUND {
            return Ok(None);
        }
        if !response.is_success() {
            return Err(SyncError::Transfer {
                path: path.to_string(),
                status: response.status,
            });
        }
        Ok(Some(ItemInfo::decode(&response.body)?))
    }

    /// Downloads, verifies and decompresses `path`.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Transfer`] if the item is missing or a chunk fails
    /// - [`SyncError::Protocol`] if the advertised size exceeds the limit or
    ///   a chunk has the wrong length
    /// - [`SyncError::HashMismatch`] if the assembled bytes do not match
    pub fn download(&self, path: &str) -> SyncResult<Downloaded> {
        let info = self.info(path)?.ok_or_else(|| SyncError::Transfer {
            path: path.to_string(),
            status: STATUS_NOT_FOUND,
        })?;
        if info.size > self.max_item_size {
            return Err(SyncError::Protocol(format!(
                "{path} is too large: {} bytes, limit {}",
                info.size, self.max_item_size
            )));
        }
        let size = usize::try_from(info.size)
            .map_err(|_| SyncError::Protocol(format!("{path} is too large: {}", info.size)))?;

        let mut data = Vec::new();
        for range in ChunkRange::plan(size, self.chunk_size)? {
            let response = self.get(&self.endpoints.download(path, range)?)?;
            if !response.is_success() {
                return Err(SyncError::Transfer {
                    path: path.to_string(),
                    status: response.status,
                });
            }
            if response.body.len() != range.size {
                return Err(SyncError::Protocol(format!(
                    "chunk of {path} at {} has {} bytes, expected {}",
                    range.offset,
                    response.body.len(),
                    range.size
                )));
            }
            data.extend_from_slice(&response.body);
        }

        if !info.hash.matches(&data) {
            return Err(SyncError::HashMismatch {
                path: path.to_string(),
            });
        }

        let payload = match info.encoding {
            Encoding::Zstd => tagsync_codec::decompress(&data)?,
            Encoding::Raw => data,
        };
        debug!(path, stored = size, size = payload.len(), version = info.version, "downloaded");
        Ok(Downloaded { payload, info })
    }
}
