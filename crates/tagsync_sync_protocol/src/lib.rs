//! # TagSync Sync Protocol
//!
//! Wire-level vocabulary shared by the device and the sync server.
//!
//! This crate provides:
//! - `SyncItem` records describing what a session must move
//! - `ItemInfo` and `UploadReceipt` messages (CBOR)
//! - Endpoint URL building and parsing for chunked transfers
//! - SHA-256 content hashes
//! - Conflict records and `ResolveStrategy`
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod endpoint;
mod error;
mod hash;
mod item;
mod messages;

pub use conflict::{Conflict, ResolveStrategy};
pub use endpoint::{EndpointRequest, Endpoints};
pub use error::{ProtocolError, ProtocolResult};
pub use hash::ContentHash;
pub use item::SyncItem;
pub use messages::{
    ChunkRange, Encoding, ItemInfo, UploadReceipt, STATUS_CONFLICT, STATUS_NOT_FOUND,
    STATUS_OK,
};
pub use url::Url;
