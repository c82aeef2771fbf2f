//! # TagSync Codec
//!
//! Encoding helpers shared by every TagSync crate:
//! - CBOR via serde for wire messages and snapshots
//! - zstd compression with frame detection for payloads
//!
//! ## Usage
//!
//! ```
//! use tagsync_codec::{compress_if_smaller, decompress, from_cbor, to_cbor, MAX_LEVEL};
//!
//! let bytes = to_cbor(&(7u32, 5u32)).unwrap();
//! let decoded: (u32, u32) = from_cbor(&bytes).unwrap();
//! assert_eq!(decoded, (7, 5));
//!
//! let payload = vec![0u8; 1024];
//! let packed = compress_if_smaller(&payload, MAX_LEVEL).unwrap().unwrap();
//! assert_eq!(decompress(&packed).unwrap(), payload);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod compression;
mod error;

pub use cbor::{from_cbor, to_cbor};
pub use compression::{
    compress, compress_if_smaller, compress_max, decompress, decompress_if_framed,
    is_compressed, DEFAULT_LEVEL, MAX_LEVEL,
};
pub use error::{CodecError, CodecResult};
