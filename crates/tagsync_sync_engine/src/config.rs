//! Configuration for the sync orchestrator.

use std::time::Duration;

/// Largest item a download will accept unless configured otherwise.
pub const DEFAULT_MAX_ITEM_SIZE: u64 = 16 * 1024 * 1024;

/// Configuration for sync sessions.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the sync server.
    pub server_url: String,
    /// Bytes per transfer request.
    pub chunk_size: usize,
    /// zstd level used for uploads.
    pub compression_level: i32,
    /// Downloads advertising more stored bytes than this are refused.
    pub max_item_size: u64,
    /// Poll interval of the session worker.
    pub tick_interval: Duration,
    /// Minimum time between automatic sessions.
    pub sync_interval: Duration,
    /// Whether `poll_auto_sync` may start sessions.
    pub auto_sync: bool,
    /// Give up on the lock after this long instead of waiting forever.
    pub lock_timeout: Option<Duration>,
    /// Do not spawn a worker; the host calls `tick` itself.
    pub manual_ticks: bool,
}

impl SyncConfig {
    /// Creates a configuration for the given server.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            chunk_size: 4096,
            compression_level: tagsync_codec::MAX_LEVEL,
            max_item_size: DEFAULT_MAX_ITEM_SIZE,
            tick_interval: Duration::from_millis(100),
            sync_interval: Duration::from_secs(3600),
            auto_sync: false,
            lock_timeout: None,
            manual_ticks: false,
        }
    }

    /// Sets the chunk size.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Sets the upload compression level.
    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    /// Sets the download size limit.
    pub fn with_max_item_size(mut self, max: u64) -> Self {
        self.max_item_size = max;
        self
    }

    /// Sets the worker poll interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Sets the interval for automatic sync.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Enables or disables automatic sync.
    pub fn with_auto_sync(mut self, enabled: bool) -> Self {
        self.auto_sync = enabled;
        self
    }

    /// Sets the lock timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Leaves ticking to the caller.
    pub fn with_manual_ticks(mut self) -> Self {
        self.manual_ticks = true;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("http://localhost/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.max_item_size, DEFAULT_MAX_ITEM_SIZE);
        assert_eq!(config.tick_interval, Duration::from_millis(100));
        assert_eq!(config.sync_interval, Duration::from_secs(3600));
        assert!(!config.auto_sync);
        assert!(!config.manual_ticks);
    }

    #[test]
    fn builder() {
        let config = SyncConfig::new("https://sync.example.com")
            .with_chunk_size(512)
            .with_max_item_size(1 << 20)
            .with_sync_interval(Duration::from_secs(60))
            .with_auto_sync(true)
            .with_manual_ticks();

        assert_eq!(config.server_url, "https://sync.example.com");
        assert_eq!(config.chunk_size, 512);
        assert_eq!(config.max_item_size, 1 << 20);
        assert_eq!(config.sync_interval, Duration::from_secs(60));
        assert!(config.auto_sync);
        assert!(config.manual_ticks);
    }
}
