//! Local durable store seam.

use crate::error::{SyncError, SyncResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tagsync_sync_protocol::SyncItem;

/// The device-side store the orchestrator reads from and applies to.
pub trait LocalStore: Send + Sync {
    /// Items changed locally since their last successful upload.
    ///
    /// Each item has `needs_upload` set and `local_version` holding the
    /// server version it was derived from.
    fn pending_changes(&self) -> SyncResult<Vec<SyncItem>>;

    /// Reads the current local payload of `path`.
    fn read(&self, path: &str) -> SyncResult<Option<Vec<u8>>>;

    /// Replaces the local copy of `path` with a server payload at `version`.
    fn apply(&self, path: &str, payload: &[u8], version: u64) -> SyncResult<()>;

    /// Records that the local copy of `path` is stored remotely as `version`.
    fn mark_uploaded(&self, path: &str, version: u64) -> SyncResult<()>;
}

#[derive(Debug, Clone)]
struct LocalEntry {
    payload: Vec<u8>,
    version: u64,
    dirty: bool,
}

/// An in-memory local store for testing.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    entries: RwLock<BTreeMap<String, LocalEntry>>,
    fail_apply: AtomicBool,
}

impl MemoryLocalStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a local change, based on whatever version was stored before.
    pub fn write(&self, path: &str, payload: &[u8]) {
        let mut entries = self.entries.write();
        let version = entries.get(path).map_or(0, |e| e.version);
        entries.insert(
            path.to_string(),
            LocalEntry {
                payload: payload.to_vec(),
                version,
                dirty: true,
            },
        );
    }

    /// Seeds a clean entry already in sync with the server at `version`.
    pub fn insert_synced(&self, path: &str, payload: &[u8], version: u64) {
        self.entries.write().insert(
            path.to_string(),
            LocalEntry {
                payload: payload.to_vec(),
                version,
                dirty: false,
            },
        );
    }

    /// Returns the payload of `path`.
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.entries.read().get(path).map(|e| e.payload.clone())
    }

    /// Returns the server version `path` was last synced at.
    pub fn version(&self, path: &str) -> Option<u64> {
        self.entries.read().get(path).map(|e| e.version)
    }

    /// Returns true if `path` has unsent changes.
    pub fn is_dirty(&self, path: &str) -> bool {
        self.entries.read().get(path).is_some_and(|e| e.dirty)
    }

    /// Makes `apply` fail, to simulate a full disk.
    pub fn set_fail_apply(&self, fail: bool) {
        self.fail_apply.store(fail, Ordering::SeqCst);
    }
}

impl LocalStore for MemoryLocalStore {
    fn pending_changes(&self) -> SyncResult<Vec<SyncItem>> {
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|(_, e)| e.dirty)
            .map(|(path, e)| SyncItem::upload(path.clone(), e.version))
            .collect())
    }

    fn read(&self, path: &str) -> SyncResult<Option<Vec<u8>>> {
        Ok(self.get(path))
    }

    fn apply(&self, path: &str, payload: &[u8], version: u64) -> SyncResult<()> {
        if self.fail_apply.load(Ordering::SeqCst) {
            return Err(SyncError::local_store(format!("cannot write {path}")));
        }
        self.insert_synced(path, payload, version);
        Ok(())
    }

    fn mark_uploaded(&self, path: &str, version: u64) -> SyncResult<()> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(path)
            .ok_or_else(|| SyncError::local_store(format!("unknown path {path}")))?;
        entry.version = version;
        entry.dirty = false;
        Ok(())
    }
}
