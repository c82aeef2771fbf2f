//! Snapshot store trait definition.

use crate::error::StorageResult;

/// A durable home for exactly one snapshot blob.
///
/// Stores are **opaque byte stores**. They never interpret the snapshot;
/// the device runtime owns the format.
///
/// # Invariants
///
/// - `replace` is atomic: a concurrent or interrupted `replace` leaves either
///   the previous blob or the new blob, never a mix
/// - `load` returns exactly the bytes of the last successful `replace`
/// - Stores must be `Send + Sync` so a persistence worker can own one
pub trait SnapshotStore: Send + Sync {
    /// Loads the current snapshot, or `None` if nothing was ever saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob exists but cannot be read.
    fn load(&self) -> StorageResult<Option<Vec<u8>>>;

    /// Atomically replaces the stored snapshot with `bytes`.
    ///
    /// # Errors
    ///
    /// Returns an error if the new blob could not be made durable. The
    /// previous blob is still in place in that case.
    fn replace(&self, bytes: &[u8]) -> StorageResult<()>;

    /// Removes the stored snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob exists but cannot be removed.
    fn clear(&self) -> StorageResult<()>;
}
