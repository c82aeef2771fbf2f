//! The device runtime.

use crate::config::DeviceConfig;
use crate::error::DeviceResult;
use crate::snapshot::{Persister, Snapshot};
use parking_lot::Mutex;
use std::sync::Arc;
use tagsync_core::{
    Admission, BackgroundWorker, Clock, ItemKind, MetricCache, Pipeline, PipelineWorker,
    WorkerControl,
};
use tagsync_storage::SnapshotStore;
use tagsync_sync_engine::{HttpClient, LocalStore, SyncOrchestrator};
use tracing::{debug, info, warn};

/// Name of the cache drain thread.
pub const DRAIN_WORKER_NAME: &str = "tagsync-drain";
/// Name of the housekeeping thread.
pub const HOUSEKEEPING_WORKER_NAME: &str = "tagsync-housekeeping";

/// Payload of a drained metric: the value, little-endian. The key is the item id.
pub fn metric_payload(value: u32) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

struct Inner {
    config: DeviceConfig,
    clock: Arc<dyn Clock>,
    cache: MetricCache,
    pipeline: Arc<Pipeline>,
    sync: SyncOrchestrator,
    persister: Persister,
}

impl Inner {
    fn drain(&self) -> DeviceResult<usize> {
        // Collected first: the sink runs under the cache lock.
        let mut drained = Vec::new();
        let visited = self
            .cache
            .process_batch(&mut |key: u32, value: u32| drained.push((key, value)))?;

        for (key, value) in drained {
            let admission = self.pipeline.add_item(
                self.config.metric_kind,
                key,
                &metric_payload(value),
                self.config.metric_priority,
            )?;
            if let Admission::Rejected(reason) = admission {
                debug!(key, ?reason, "drained metric not admitted");
            }
        }
        Ok(visited)
    }

    fn persist(&self) -> DeviceResult<bool> {
        let checkpoint = self.cache.checkpoint()?;
        let snapshot = Snapshot::new(
            self.clock.now_ms(),
            checkpoint.entries,
            self.pipeline.pending_items()?,
            self.sync.bookkeeping()?,
        );
        self.persister.save(&snapshot)?;
        Ok(self.cache.mark_synced(checkpoint.revision)?)
    }

    fn housekeeping(&self) -> DeviceResult<()> {
        let evicted = self.cache.cleanup()?;
        if evicted > 0 {
            debug!(evicted, "stale metrics evicted");
        }
        self.persist()?;
        if let Some(session) = self.sync.poll_auto_sync()? {
            info!(%session, "auto-sync started");
        }
        Ok(())
    }

    fn restore(&self, snapshot: Snapshot) -> DeviceResult<()> {
        let entries = self.cache.restore(snapshot.cache)?;
        let items = self.pipeline.restore(snapshot.pending)?;
        self.sync.restore_bookkeeping(snapshot.sync)?;
        info!(entries, items, saved_at = snapshot.saved_at, "device state restored");
        Ok(())
    }
}

#[derive(Default)]
struct Workers {
    drain: Option<BackgroundWorker>,
    pipeline: Option<PipelineWorker>,
    housekeeping: Option<BackgroundWorker>,
}

impl Workers {
    fn is_running(&self) -> bool {
        self.drain.is_some() || self.pipeline.is_some() || self.housekeeping.is_some()
    }

    fn stop(&mut self) {
        if let Some(mut worker) = self.drain.take() {
            worker.stop();
        }
        if let Some(mut worker) = self.pipeline.take() {
            worker.stop();
        }
        if let Some(mut worker) = self.housekeeping.take() {
            worker.stop();
        }
    }
}

/// A device: metric cache, batch pipeline and sync orchestrator sharing one
/// clock and one snapshot.
///
/// Metrics flow from [`record_metric`](Self::record_metric) through periodic
/// drains into the pipeline, which uploads them through the host's
/// [`Uploader`](tagsync_core::Uploader). The orchestrator moves whole
/// documents through the host's [`LocalStore`].
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use tagsync::{Device, DeviceConfig};
/// use tagsync_core::ManualClock;
/// use tagsync_storage::InMemorySnapshotStore;
/// use tagsync_sync_engine::{MemoryLocalStore, MemoryRemote};
///
/// let device = Device::open(
///     DeviceConfig::default(),
///     Arc::new(ManualClock::new(0)),
///     Arc::new(InMemorySnapshotStore::new()),
///     Arc::new(MemoryRemote::new()),
///     Arc::new(MemoryLocalStore::new()),
/// )
/// .unwrap();
///
/// device.record_metric(7, 120).unwrap();
/// assert_eq!(device.cache().get(7).unwrap().unwrap().value, 120);
/// ```
pub struct Device {
    inner: Arc<Inner>,
    workers: Mutex<Workers>,
}

impl Device {
    /// Builds the components and restores the stored snapshot, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync configuration is invalid or the stored
    /// snapshot cannot be read.
    pub fn open(
        config: DeviceConfig,
        clock: Arc<dyn Clock>,
        snapshots: Arc<dyn SnapshotStore>,
        client: Arc<dyn HttpClient>,
        local_store: Arc<dyn LocalStore>,
    ) -> DeviceResult<Self> {
        let cache = MetricCache::new(config.cache.clone(), Arc::clone(&clock));
        let pipeline = Arc::new(Pipeline::new(config.pipeline.clone(), Arc::clone(&clock)));
        let sync = SyncOrchestrator::new(config.sync.clone(), client, local_store, Arc::clone(&clock))?;
        let persister = Persister::new(snapshots, config.snapshot_level);

        let inner = Inner {
            config,
            clock,
            cache,
            pipeline,
            sync,
            persister,
        };
        if let Some(snapshot) = inner.persister.load()? {
            inner.restore(snapshot)?;
        }

        Ok(Self {
            inner: Arc::new(inner),
            workers: Mutex::new(Workers::default()),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &DeviceConfig {
        &self.inner.config
    }

    /// The metric cache.
    pub fn cache(&self) -> &MetricCache {
        &self.inner.cache
    }

    /// The batch pipeline.
    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    /// The sync orchestrator.
    pub fn sync(&self) -> &SyncOrchestrator {
        &self.inner.sync
    }

    /// Records a metric value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CapacityExceeded`](tagsync_core::CoreError) when
    /// the cache is full of distinct keys.
    pub fn record_metric(&self, key: u32, value: u32) -> DeviceResult<()> {
        Ok(self.inner.cache.update(key, value)?)
    }

    /// Submits an event directly to the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline lock is unavailable.
    pub fn submit(
        &self,
        kind: ItemKind,
        id: u32,
        payload: &[u8],
        priority: u32,
    ) -> DeviceResult<Admission> {
        Ok(self.inner.pipeline.add_item(kind, id, payload, priority)?)
    }

    /// Drains due metrics into the pipeline.
    ///
    /// Returns the number of metrics visited; 0 if no drain was due.
    ///
    /// # Errors
    ///
    /// Returns an error if a lock is unavailable.
    pub fn drain_metrics(&self) -> DeviceResult<usize> {
        self.inner.drain()
    }

    /// Writes a snapshot of the whole device state.
    ///
    /// Returns true if the cache is clean afterwards. It stays dirty when a
    /// metric changed while the snapshot was being written.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written; the cache stays
    /// dirty in that case.
    pub fn persist(&self) -> DeviceResult<bool> {
        self.inner.persist()
    }

    /// Runs one housekeeping pass: evict stale metrics, persist, poll
    /// auto-sync.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error.
    pub fn housekeeping(&self) -> DeviceResult<()> {
        self.inner.housekeeping()
    }

    /// Spawns the drain, pipeline and housekeeping workers.
    ///
    /// Does nothing if they are already running.
    ///
    /// # Errors
    ///
    /// Returns an error if a thread cannot be spawned; workers already
    /// started are stopped again.
    pub fn start(&self) -> DeviceResult<()> {
        let mut workers = self.workers.lock();
        if workers.is_running() {
            return Ok(());
        }
        if let Err(e) = self.spawn_workers(&mut workers) {
            workers.stop();
            return Err(e);
        }
        info!("device workers started");
        Ok(())
    }

    fn spawn_workers(&self, workers: &mut Workers) -> DeviceResult<()> {
        let inner = Arc::clone(&self.inner);
        workers.drain = Some(BackgroundWorker::spawn(
            DRAIN_WORKER_NAME,
            self.inner.config.drain_poll_interval,
            move || {
                if let Err(e) = inner.drain() {
                    warn!(error = %e, "metric drain failed");
                }
                WorkerControl::Continue
            },
        )?);

        workers.pipeline = Some(PipelineWorker::spawn(Arc::clone(&self.inner.pipeline))?);

        let inner = Arc::clone(&self.inner);
        workers.housekeeping = Some(BackgroundWorker::spawn(
            HOUSEKEEPING_WORKER_NAME,
            self.inner.config.housekeeping_interval,
            move || {
                if let Err(e) = inner.housekeeping() {
                    warn!(error = %e, retryable = e.is_retryable(), "housekeeping failed");
                }
                WorkerControl::Continue
            },
        )?);
        Ok(())
    }

    /// Returns true while the workers run.
    pub fn is_running(&self) -> bool {
        self.workers.lock().is_running()
    }

    /// Stops all workers and any running sync session, then writes a final
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if stopping the session or the final persist fails.
    pub fn shutdown(&self) -> DeviceResult<()> {
        self.workers.lock().stop();
        self.inner.sync.stop_sync()?;
        self.inner.persist()?;
        info!("device shut down");
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.workers.lock().stop();
    }
}
