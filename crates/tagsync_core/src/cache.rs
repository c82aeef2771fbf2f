//! Bounded write-behind metric cache.
//!
//! Producers record achievement progress with [`MetricCache::update`]; a
//! collaborator drains the cache once per drain interval with
//! [`MetricCache::process_batch`] and persists it whenever
//! [`MetricCache::needs_sync`] reports unsaved changes.
//!
//! ## Invariants
//!
//! - At most `capacity` entries are held
//! - After compaction keys are unique and ascending, and each key keeps the
//!   entry with the greatest `updated_at`
//! - A failed `update` leaves every entry untouched
//! - The dirty flag is only cleared for a checkpoint that is still current

use crate::clock::{millis, Clock};
use crate::error::{CoreError, CoreResult};
use crate::lock::acquire;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// One cached progress value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricEntry {
    /// Metric key (for example an achievement id).
    pub key: u32,
    /// Latest value.
    pub value: u32,
    /// Clock reading of the last write or drain, in milliseconds.
    pub updated_at: u64,
}

/// Configuration for [`MetricCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries.
    pub capacity: usize,
    /// Maximum entries handed to the sink per drain.
    pub batch_size: usize,
    /// Minimum time between two drains.
    pub drain_interval: Duration,
    /// Entries older than `stale_factor × drain_interval` are evicted by `cleanup`.
    pub stale_factor: u32,
    /// Give up on the lock after this long instead of waiting forever.
    pub lock_timeout: Option<Duration>,
}

impl CacheConfig {
    /// Sets the capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the drain batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the drain interval.
    pub fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval = interval;
        self
    }

    /// Sets the lock timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Age in milliseconds after which an entry is stale.
    pub fn stale_after_ms(&self) -> u64 {
        millis(self.drain_interval).saturating_mul(u64::from(self.stale_factor))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 32,
            batch_size: 16,
            drain_interval: Duration::from_millis(1000),
            stale_factor: 10,
            lock_timeout: None,
        }
    }
}

/// Receives drained entries.
///
/// Implemented for every `FnMut(u32, u32)`, so a closure forwarding into the
/// pipeline is enough in most cases.
pub trait DrainSink {
    /// Handles one drained entry.
    fn drain(&mut self, key: u32, value: u32);
}

impl<F> DrainSink for F
where
    F: FnMut(u32, u32),
{
    fn drain(&mut self, key: u32, value: u32) {
        self(key, value)
    }
}

/// Cache contents at a revision, for persisting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheCheckpoint {
    /// Entries in storage order.
    pub entries: Vec<MetricEntry>,
    /// Revision to hand back to [`MetricCache::mark_synced`].
    pub revision: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: Vec<MetricEntry>,
    last_drain: u64,
    revision: u64,
    synced_revision: u64,
}

impl CacheState {
    fn is_dirty(&self) -> bool {
        self.revision != self.synced_revision
    }

    fn touch(&mut self) {
        self.revision += 1;
    }
}

/// A bounded key → value cache with a dirty flag.
///
/// All operations run under one lock. The drain sink is called while that
/// lock is held and must not call back into the same cache.
pub struct MetricCache {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState>,
}

impl MetricCache {
    /// Creates an empty cache.
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: Vec::with_capacity(config.capacity),
                ..CacheState::default()
            }),
            config,
            clock,
        }
    }

    /// Creates an empty cache with default configuration.
    pub fn with_defaults(clock: Arc<dyn Clock>) -> Self {
        Self::new(CacheConfig::default(), clock)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> CoreResult<MutexGuard<'_, CacheState>> {
        acquire(&self.state, self.config.lock_timeout)
            .ok_or(CoreError::LockTimeout { component: "cache" })
    }

    /// Records `value` for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CapacityExceeded`] if `key` is new and the cache
    /// is still full after compaction. Nothing is modified in that case.
    pub fn update(&self, key: u32, value: u32) -> CoreResult<()> {
        let now = self.clock.now_ms();
        let mut state = self.lock()?;

        if let Some(entry) = state.entries.iter_mut().find(|e| e.key == key) {
            entry.value = value;
            entry.updated_at = now;
            state.touch();
            trace!(key, value, "metric updated");
            return Ok(());
        }

        if state.entries.len() >= self.config.capacity {
            compact_entries(&mut state.entries);
            if state.entries.len() >= self.config.capacity {
                warn!(key, capacity = self.config.capacity, "metric cache full");
                return Err(CoreError::CapacityExceeded {
                    capacity: self.config.capacity,
                });
            }
        }

        state.entries.push(MetricEntry {
            key,
            value,
            updated_at: now,
        });
        state.touch();
        trace!(key, value, "metric inserted");
        Ok(())
    }

    /// Drains up to `batch_size` entries into `sink` if the drain interval
    /// has elapsed.
    ///
    /// Returns the number of entries handed to the sink (0 when it is not
    /// yet time to drain).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if the lock is unavailable.
    pub fn process_batch<S>(&self, sink: &mut S) -> CoreResult<usize>
    where
        S: DrainSink + ?Sized,
    {
        let now = self.clock.now_ms();
        let mut state = self.lock()?;

        if now.saturating_sub(state.last_drain) < millis(self.config.drain_interval) {
            return Ok(0);
        }

        let mut visited = 0;
        for entry in state.entries.iter_mut().take(self.config.batch_size) {
            sink.drain(entry.key, entry.value);
            entry.updated_at = now;
            visited += 1;
        }

        if visited > 0 {
            compact_entries(&mut state.entries);
        }
        state.last_drain = now;

        debug!(visited, remaining = state.entries.len(), "metric cache drained");
        Ok(visited)
    }

    /// Returns true if there are changes not yet covered by `mark_synced`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if the lock is unavailable.
    pub fn needs_sync(&self) -> CoreResult<bool> {
        Ok(self.lock()?.is_dirty())
    }

    /// Captures the entries to persist together with their revision.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if the lock is unavailable.
    pub fn checkpoint(&self) -> CoreResult<CacheCheckpoint> {
        let state = self.lock()?;
        Ok(CacheCheckpoint {
            entries: state.entries.clone(),
            revision: state.revision,
        })
    }

    /// Clears the dirty flag if no update happened after `revision` was
    /// captured.
    ///
    /// Returns true if the cache is clean afterwards. An update racing
    /// between persisting a checkpoint and this call keeps the flag set.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if the lock is unavailable.
    pub fn mark_synced(&self, revision: u64) -> CoreResult<bool> {
        let mut state = self.lock()?;
        if revision == state.revision {
            state.synced_revision = revision;
        }
        Ok(!state.is_dirty())
    }

    /// Evicts entries older than `stale_factor × drain_interval`.
    ///
    /// Survivors keep their relative order. Returns the number evicted.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if the lock is unavailable.
    pub fn cleanup(&self) -> CoreResult<usize> {
        let now = self.clock.now_ms();
        let stale_after = self.config.stale_after_ms();
        let mut state = self.lock()?;

        let before = state.entries.len();
        state
            .entries
            .retain(|e| now.saturating_sub(e.updated_at) <= stale_after);
        let evicted = before - state.entries.len();

        if evicted > 0 {
            debug!(evicted, "stale metrics evicted");
        }
        Ok(evicted)
    }

    /// Sorts entries by key and drops duplicates, keeping the newest.
    ///
    /// Returns the number of entries removed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if the lock is unavailable.
    pub fn compact(&self) -> CoreResult<usize> {
        let mut state = self.lock()?;
        Ok(compact_entries(&mut state.entries))
    }

    /// Replaces the contents with entries loaded from a snapshot.
    ///
    /// The entries are compacted, truncated to capacity and stamped with the
    /// current time. The cache is clean afterwards since the entries came
    /// from durable storage. Returns the number of entries kept.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if the lock is unavailable.
    pub fn restore(&self, mut entries: Vec<MetricEntry>) -> CoreResult<usize> {
        let now = self.clock.now_ms();
        compact_entries(&mut entries);
        entries.truncate(self.config.capacity);
        for entry in &mut entries {
            entry.updated_at = now;
        }

        let mut state = self.lock()?;
        state.entries = entries;
        state.touch();
        state.synced_revision = state.revision;
        Ok(state.entries.len())
    }

    /// Returns a copy of all entries in storage order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if the lock is unavailable.
    pub fn entries(&self) -> CoreResult<Vec<MetricEntry>> {
        Ok(self.lock()?.entries.clone())
    }

    /// Looks up one key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if the lock is unavailable.
    pub fn get(&self, key: u32) -> CoreResult<Option<MetricEntry>> {
        Ok(self.lock()?.entries.iter().find(|e| e.key == key).copied())
    }

    /// Returns the number of entries.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if the lock is unavailable.
    pub fn len(&self) -> CoreResult<usize> {
        Ok(self.lock()?.entries.len())
    }

    /// Returns true if the cache holds no entries.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if the lock is unavailable.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// Sorts by key, newest first within a key, then keeps the first of each run.
fn compact_entries(entries: &mut Vec<MetricEntry>) -> usize {
    let before = entries.len();
    entries.sort_unstable_by(|a, b| a.key.cmp(&b.key).then(b.updated_at.cmp(&a.updated_at)));
    entries.dedup_by_key(|e| e.key);
    before - entries.len()
}
