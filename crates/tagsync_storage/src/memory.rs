//! In-memory snapshot store for testing.

use crate::backend::SnapshotStore;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// An in-memory snapshot store.
///
/// Suitable for unit and integration tests. It counts successful writes
/// and can be told to fail the next writes to exercise error paths.
///
/// # Example
///
/// ```rust
/// use tagsync_storage::{InMemorySnapshotStore, SnapshotStore};
///
/// let store = InMemorySnapshotStore::new();
/// assert!(store.load().unwrap().is_none());
/// store.replace(b"snapshot").unwrap();
/// assert_eq!(store.load().unwrap().unwrap(), b"snapshot");
/// ```
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    blob: RwLock<Option<Vec<u8>>>,
    writes: AtomicU64,
    fail_writes: AtomicBool,
}

impl InMemorySnapshotStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding an existing blob.
    ///
    /// Useful for testing recovery.
    #[must_use]
    pub fn with_blob(blob: Vec<u8>) -> Self {
        Self {
            blob: RwLock::new(Some(blob)),
            ..Self::default()
        }
    }

    /// Number of successful `replace` calls.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Makes every following `replace` fail until switched off again.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn load(&self) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.blob.read().clone())
    }

    fn replace(&self, bytes: &[u8]) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other(
                "injected write failure",
            )));
        }
        *self.blob.write() = Some(bytes.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        *self.blob.write() = None;
        Ok(())
    }
}
