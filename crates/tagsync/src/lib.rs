//! # TagSync
//!
//! Offline-first sync runtime for handheld game devices.
//!
//! This crate provides:
//! - [`Device`], which wires the metric cache, the batch pipeline and the
//!   sync orchestrator to one clock and one snapshot
//! - The [`Snapshot`] format (CBOR, then zstd) and its [`Persister`]
//! - Background workers for metric drains, batch uploads and housekeeping
//!
//! ## Persistence
//!
//! The whole offline state lives in one blob written through a
//! [`SnapshotStore`](tagsync_storage::SnapshotStore). The cache's dirty flag
//! is cleared only for the revision that was written, so a metric recorded
//! during a persist is written again next time.
//!
//! The component crates are re-exported for convenience.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod device;
mod error;
mod snapshot;

pub use config::DeviceConfig;
pub use device::{metric_payload, Device, DRAIN_WORKER_NAME, HOUSEKEEPING_WORKER_NAME};
pub use error::{DeviceError, DeviceResult};
pub use snapshot::{Persister, Snapshot, SNAPSHOT_FORMAT_VERSION};

pub use tagsync_codec as codec;
pub use tagsync_core as core;
pub use tagsync_storage as storage;
pub use tagsync_sync_engine as sync;
