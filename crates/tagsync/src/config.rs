//! Device runtime configuration.

use std::time::Duration;
use tagsync_core::{CacheConfig, ItemKind, PipelineConfig};
use tagsync_sync_engine::SyncConfig;

/// Configuration for a [`Device`](crate::Device).
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Metric cache settings.
    pub cache: CacheConfig,
    /// Batch pipeline settings.
    pub pipeline: PipelineConfig,
    /// Sync orchestrator settings.
    pub sync: SyncConfig,
    /// How often the drain worker polls the cache.
    ///
    /// The cache itself enforces `cache.drain_interval`; this only bounds the
    /// delay before a due drain runs.
    pub drain_poll_interval: Duration,
    /// How often the housekeeping worker evicts stale metrics, persists a
    /// snapshot and polls auto-sync.
    pub housekeeping_interval: Duration,
    /// Kind given to drained metrics entering the pipeline.
    pub metric_kind: ItemKind,
    /// Priority given to drained metrics entering the pipeline.
    pub metric_priority: u32,
    /// zstd level for snapshots.
    pub snapshot_level: i32,
}

impl DeviceConfig {
    /// Sets the cache configuration.
    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Sets the pipeline configuration.
    #[must_use]
    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Sets the sync configuration.
    #[must_use]
    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    /// Sets the drain poll interval.
    #[must_use]
    pub fn with_drain_poll_interval(mut self, interval: Duration) -> Self {
        self.drain_poll_interval = interval;
        self
    }

    /// Sets the housekeeping interval.
    #[must_use]
    pub fn with_housekeeping_interval(mut self, interval: Duration) -> Self {
        self.housekeeping_interval = interval;
        self
    }

    /// Sets kind and priority of drained metrics.
    #[must_use]
    pub fn with_metric_items(mut self, kind: ItemKind, priority: u32) -> Self {
        self.metric_kind = kind;
        self.metric_priority = priority;
        self
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            pipeline: PipelineConfig::default(),
            sync: SyncConfig::default(),
            drain_poll_interval: Duration::from_millis(100),
            housekeeping_interval: Duration::from_secs(30),
            metric_kind: ItemKind::Achievement,
            metric_priority: 1,
            snapshot_level: tagsync_codec::DEFAULT_LEVEL,
        }
    }
}
