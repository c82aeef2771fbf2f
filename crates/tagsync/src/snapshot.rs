//! The persisted device snapshot.
//!
//! A snapshot is the whole offline state in one blob: cache entries,
//! pending pipeline items and sync bookkeeping, CBOR-encoded and then
//! zstd-compressed.

use crate::error::{DeviceError, DeviceResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tagsync_core::{Item, MetricEntry};
use tagsync_storage::SnapshotStore;
use tagsync_sync_engine::SyncBookkeeping;
use tracing::{debug, info};

/// Current snapshot format version.
pub const SNAPSHOT_FORMAT_VERSION: u16 = 1;

/// Offline state of a device at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Format version of the writer.
    pub format_version: u16,
    /// Clock reading when the snapshot was taken.
    pub saved_at: u64,
    /// Metric cache entries.
    pub cache: Vec<MetricEntry>,
    /// Items waiting in the pipeline.
    pub pending: Vec<Item>,
    /// Sync queues and known server versions.
    pub sync: SyncBookkeeping,
}

impl Snapshot {
    /// Creates a snapshot at the current format version.
    pub fn new(
        saved_at: u64,
        cache: Vec<MetricEntry>,
        pending: Vec<Item>,
        sync: SyncBookkeeping,
    ) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            saved_at,
            cache,
            pending,
            sync,
        }
    }

    /// Encodes as CBOR, then compresses.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or compression fails.
    pub fn encode(&self, level: i32) -> DeviceResult<Vec<u8>> {
        let cbor = tagsync_codec::to_cbor(self)?;
        Ok(tagsync_codec::compress(&cbor, level)?)
    }

    /// Decodes a blob written by [`encode`](Self::encode).
    ///
    /// Uncompressed CBOR is accepted too.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::UnsupportedSnapshot`] for a newer format, or a
    /// codec error if the blob is corrupt.
    pub fn decode(bytes: &[u8]) -> DeviceResult<Self> {
        let cbor = tagsync_codec::decompress_if_framed(bytes)?;
        let snapshot: Snapshot = tagsync_codec::from_cbor(&cbor)?;
        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(DeviceError::UnsupportedSnapshot {
                found: snapshot.format_version,
                supported: SNAPSHOT_FORMAT_VERSION,
            });
        }
        Ok(snapshot)
    }
}

/// Writes and reads snapshots through a [`SnapshotStore`].
pub struct Persister {
    store: Arc<dyn SnapshotStore>,
    level: i32,
}

impl Persister {
    /// Creates a persister compressing at `level`.
    pub fn new(store: Arc<dyn SnapshotStore>, level: i32) -> Self {
        Self { store, level }
    }

    /// Loads the stored snapshot, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the blob does not decode.
    pub fn load(&self) -> DeviceResult<Option<Snapshot>> {
        let Some(bytes) = self.store.load()? else {
            debug!("no snapshot stored");
            return Ok(None);
        };
        let snapshot = Snapshot::decode(&bytes)?;
        info!(
            saved_at = snapshot.saved_at,
            entries = snapshot.cache.len(),
            pending = snapshot.pending.len(),
            "snapshot loaded"
        );
        Ok(Some(snapshot))
    }

    /// Atomically replaces the stored snapshot.
    ///
    /// Returns the size of the written blob.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the store fails; the previous
    /// snapshot stays in place.
    pub fn save(&self, snapshot: &Snapshot) -> DeviceResult<usize> {
        let bytes = snapshot.encode(self.level)?;
        self.store.replace(&bytes)?;
        debug!(bytes = bytes.len(), saved_at = snapshot.saved_at, "snapshot saved");
        Ok(bytes.len())
    }

    /// Removes the stored snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn clear(&self) -> DeviceResult<()> {
        Ok(self.store.clear()?)
    }
}
