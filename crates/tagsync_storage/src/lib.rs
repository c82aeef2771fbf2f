//! # TagSync Storage
//!
//! Snapshot stores for TagSync.
//!
//! The device keeps its whole offline state (metric cache, pending pipeline
//! items, sync bookkeeping) in a single serialized blob. This crate provides
//! the place that blob lives. Stores are **opaque byte stores** and do not
//! interpret what they hold.
//!
//! ## Available Stores
//!
//! - [`InMemorySnapshotStore`] - For testing
//! - [`FileSnapshotStore`] - Temp-file + rename, optional `.bak` backup
//!
//! ## Example
//!
//! ```rust
//! use tagsync_storage::{InMemorySnapshotStore, SnapshotStore};
//!
//! let store = InMemorySnapshotStore::new();
//! store.replace(b"hello").unwrap();
//! assert_eq!(store.load().unwrap().unwrap(), b"hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::SnapshotStore;
pub use error::{StorageError, StorageResult};
pub use file::FileSnapshotStore;
pub use memory::InMemorySnapshotStore;
