//! zstd compression for payloads and snapshots.
//!
//! Compressed buffers are recognised by the zstd frame magic, so callers can
//! store compressed and plain payloads side by side and decompress only when
//! needed.

use crate::error::{CodecError, CodecResult};

/// Zstd frame magic bytes (little-endian 0xFD2FB528).
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Highest level that does not require zstd's long-window "ultra" mode.
pub const MAX_LEVEL: i32 = 19;

/// Level used for snapshots, which are written often.
pub const DEFAULT_LEVEL: i32 = 3;

/// Returns true if `data` starts with a zstd frame header.
#[inline]
#[must_use]
pub fn is_compressed(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == ZSTD_MAGIC
}

/// Compress bytes at the given level (clamped to `1..=MAX_LEVEL`).
///
/// # Errors
///
/// Returns an error if the encoder fails.
pub fn compress(data: &[u8], level: i32) -> CodecResult<Vec<u8>> {
    zstd::encode_all(data, level.clamp(1, MAX_LEVEL))
        .map_err(|e| CodecError::compression_failed(e.to_string()))
}

/// Compress bytes at the maximum ratio.
///
/// # Errors
///
/// Returns an error if the encoder fails.
pub fn compress_max(data: &[u8]) -> CodecResult<Vec<u8>> {
    compress(data, MAX_LEVEL)
}

/// Compress only if the result is strictly smaller than the input.
///
/// Returns `Ok(None)` when compression does not pay off.
///
/// # Errors
///
/// Returns an error if the encoder fails.
pub fn compress_if_smaller(data: &[u8], level: i32) -> CodecResult<Option<Vec<u8>>> {
    let compressed = compress(data, level)?;
    if compressed.len() < data.len() {
        Ok(Some(compressed))
    } else {
        Ok(None)
    }
}

/// Decompress a zstd buffer.
///
/// # Errors
///
/// Returns an error if the data is not a valid zstd stream.
pub fn decompress(data: &[u8]) -> CodecResult<Vec<u8>> {
    zstd::decode_all(data).map_err(|e| CodecError::decompression_failed(e.to_string()))
}

/// Decompress if the buffer carries a zstd header, otherwise copy it.
///
/// # Errors
///
/// Returns an error if a zstd-framed buffer fails to decode.
pub fn decompress_if_framed(data: &[u8]) -> CodecResult<Vec<u8>> {
    if is_compressed(data) {
        decompress(data)
    } else {
        Ok(data.to_vec())
    }
}
