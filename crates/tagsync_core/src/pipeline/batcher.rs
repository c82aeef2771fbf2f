//! The batching pipeline.

use super::filter::Filter;
use super::item::{Batch, Item, ItemKind};
use crate::clock::{millis, Clock};
use crate::error::{CoreError, CoreResult};
use crate::lock::acquire;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Configuration for [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Nominal buffer size; a batch holding half of it is flushed.
    pub buffer_capacity: usize,
    /// Maximum items per batch.
    pub max_batch_size: usize,
    /// Payloads larger than this are offered to the compressor.
    pub compression_chunk: usize,
    /// zstd level used for payload compression.
    pub compression_level: i32,
    /// Consecutive upload failures before the batch is dropped.
    pub retry_limit: u32,
    /// A non-empty batch is flushed at least this often.
    pub flush_interval: Duration,
    /// Poll interval of the pipeline worker.
    pub tick_interval: Duration,
    /// Give up on the lock after this long instead of waiting forever.
    pub lock_timeout: Option<Duration>,
}

impl PipelineConfig {
    /// Sets the buffer capacity.
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Sets the maximum batch size.
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Sets the retry limit.
    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit;
        self
    }

    /// Sets the forced flush interval.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Sets the worker poll interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Sets the lock timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 4096,
            max_batch_size: 32,
            compression_chunk: 512,
            compression_level: tagsync_codec::MAX_LEVEL,
            retry_limit: 3,
            flush_interval: Duration::from_millis(5000),
            tick_interval: Duration::from_millis(100),
            lock_timeout: None,
        }
    }
}

/// Handles one item during a batch pass (typically durable persistence).
pub trait Processor: Send + Sync {
    /// Processes an item. An error aborts the rest of the pass.
    fn process(&self, item: &Item) -> CoreResult<()>;
}

impl<F> Processor for F
where
    F: Fn(&Item) -> CoreResult<()> + Send + Sync,
{
    fn process(&self, item: &Item) -> CoreResult<()> {
        self(item)
    }
}

/// Ships a whole batch to the remote store.
pub trait Uploader: Send + Sync {
    /// Uploads the batch. An error keeps the batch for retry.
    fn upload(&self, batch: &Batch) -> CoreResult<()>;
}

impl<F> Uploader for F
where
    F: Fn(&Batch) -> CoreResult<()> + Send + Sync,
{
    fn upload(&self, batch: &Batch) -> CoreResult<()> {
        self(batch)
    }
}

/// Result of `add_item`.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The item is now owned by the batch.
    Admitted,
    /// The item was not added; the batch is unchanged.
    Rejected(RejectReason),
}

impl Admission {
    /// Returns true if the item was added.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Why an item was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The batch already holds `max_batch_size` items.
    BatchFull,
    /// The payload was empty.
    EmptyPayload,
    /// The active filter declined the item.
    Filtered,
}

/// What one worker iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The batch was not ready.
    Idle,
    /// The processor failed; the batch is kept and retried next tick.
    ProcessFailed,
    /// The batch was uploaded.
    Uploaded(usize),
    /// The upload failed and will be retried.
    UploadFailed {
        /// Consecutive failures so far.
        retry_count: u32,
    },
    /// The retry budget ran out and the batch was discarded.
    Dropped(usize),
}

/// Observational counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Items accepted by the processor since creation.
    pub processed_items: u64,
    /// Items in batches whose upload failed (counted per attempt).
    pub failed_items: u64,
    /// Consecutive upload failures of the current batch.
    pub retry_count: u32,
}

struct PipelineState {
    batch: Batch,
    filter: Filter,
    processed_items: u64,
    failed_items: u64,
    retry_count: u32,
    last_sync: u64,
    processor: Option<Arc<dyn Processor>>,
    uploader: Option<Arc<dyn Uploader>>,
}

/// Collects items, orders and compresses them, and hands batches to an uploader.
///
/// All state sits behind one lock. Processor and uploader run while the lock
/// is held and must not call back into the same pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<PipelineState>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    pub fn new(config: PipelineConfig, clock: Arc<dyn Clock>) -> Self {
        let last_sync = clock.now_ms();
        Self {
            config,
            clock,
            state: Mutex::new(PipelineState {
                batch: Batch::new(),
                filter: Filter::None,
                processed_items: 0,
                failed_items: 0,
                retry_count: 0,
                last_sync,
                processor: None,
                uploader: None,
            }),
        }
    }

    /// Creates an empty pipeline with default configuration.
    pub fn with_defaults(clock: Arc<dyn Clock>) -> Self {
        Self::new(PipelineConfig::default(), clock)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn lock(&self) -> CoreResult<MutexGuard<'_, PipelineState>> {
        acquire(&self.state, self.config.lock_timeout).ok_or(CoreError::LockTimeout {
            component: "pipeline",
        })
    }

    /// Replaces the admission filter.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if the lock is unavailable.
    pub fn set_filter(&self, filter: Filter) -> CoreResult<()> {
        self.lock()?.filter = filter;
        Ok(())
    }

    /// Installs the per-item processor.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if the lock is unavailable.
    pub fn set_processor<P: Processor + 'static>(&self, processor: P) -> CoreResult<()> {
        self.lock()?.processor = Some(Arc::new(processor));
        Ok(())
    }

    /// Installs the batch uploader.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if the lock is unavailable.
    pub fn set_uploader<U: Uploader + 'static>(&self, uploader: U) -> CoreResult<()> {
        self.lock()?.uploader = Some(Arc::new(uploader));
        Ok(())
    }

    /// Offers an item to the batch.
    ///
    /// The payload is copied into pipeline-owned storage on admission.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if the lock is unavailable.
    pub fn add_item(
        &self,
        kind: ItemKind,
        id: u32,
        payload: &[u8],
        priority: u32,
    ) -> CoreResult<Admission> {
        if payload.is_empty() {
            return Ok(Admission::Rejected(RejectReason::EmptyPayload));
        }

        let now = self.clock.now_ms();
        let mut state = self.lock()?;

        if state.batch.len() >= self.config.max_batch_size {
            trace!(id, "batch full, item rejected");
            return Ok(Admission::Rejected(RejectReason::BatchFull));
        }

        let item = Item::new(kind, id, now, payload.to_vec(), priority);
        if !state.filter.admits(&item, now) {
            trace!(id, filter = ?state.filter, "item filtered");
            return Ok(Admission::Rejected(RejectReason::Filtered));
        }

        state.batch.push(item);
        trace!(id, ?kind, priority, size = payload.len(), "item admitted");
        Ok(Admission::Admitted)
    }

    /// Runs one processing pass over the batch.
    ///
    /// Items are visited in priority order (stable for equal priorities).
    /// Large payloads are compressed if that makes them strictly smaller.
    /// Returns the number of items handed to the processor in this pass.
    ///
    /// # Errors
    ///
    /// - [`CoreError::BatchEmpty`] if there is nothing to process
    /// - [`CoreError::CallbackFailure`] if the processor rejected an item;
    ///   items accepted before it stay processed
    pub fn process_batch(&self) -> CoreResult<usize> {
        let mut state = self.lock()?;
        self.process_locked(&mut state)
    }

    /// Hands the batch to the uploader.
    ///
    /// On success the batch is emptied and the uploaded count returned.
    ///
    /// # Errors
    ///
    /// - [`CoreError::BatchEmpty`] or [`CoreError::NoUploader`] if nothing was attempted
    /// - [`CoreError::UploadFailed`] if the uploader failed; the batch is kept
    pub fn upload_batch(&self) -> CoreResult<usize> {
        let mut state = self.lock()?;
        Self::upload_locked(&mut state)
    }

    /// Returns true if the worker would flush the batch now.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if the lock is unavailable.
    pub fn is_ready(&self) -> CoreResult<bool> {
        let now = self.clock.now_ms();
        let state = self.lock()?;
        Ok(self.ready_locked(&state, now))
    }

    /// One worker iteration: flush the batch if it is ready.
    ///
    /// After `retry_limit` consecutive upload failures the batch is
    /// discarded and only the counters remember it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if the lock is unavailable.
    pub fn tick(&self) -> CoreResult<TickOutcome> {
        let now = self.clock.now_ms();
        let mut state = self.lock()?;

        if !self.ready_locked(&state, now) {
            return Ok(TickOutcome::Idle);
        }

        if let Err(e) = self.process_locked(&mut state) {
            debug!(error = %e, "batch pass failed");
            return Ok(TickOutcome::ProcessFailed);
        }

        match Self::upload_locked(&mut state) {
            Ok(uploaded) => {
                state.retry_count = 0;
                state.last_sync = now;
                info!(uploaded, "batch uploaded");
                Ok(TickOutcome::Uploaded(uploaded))
            }
            Err(e) => {
                let count = state.batch.len();
                state.failed_items += count as u64;
                state.retry_count += 1;

                if state.retry_count >= self.config.retry_limit {
                    state.batch.clear();
                    state.retry_count = 0;
                    warn!(dropped = count, error = %e, "retry budget exhausted, batch dropped");
                    Ok(TickOutcome::Dropped(count))
                } else {
                    debug!(retry_count = state.retry_count, error = %e, "upload failed");
                    Ok(TickOutcome::UploadFailed {
                        retry_count: state.retry_count,
                    })
                }
            }
        }
    }

    /// Returns the counters.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if the lock is unavailable.
    pub fn stats(&self) -> CoreResult<PipelineStats> {
        let state = self.lock()?;
        Ok(PipelineStats {
            processed_items: state.processed_items,
            failed_items: state.failed_items,
            retry_count: state.retry_count,
        })
    }

    /// Returns the original payload of a pending item.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is unavailable or the stored payload is
    /// corrupt.
    pub fn find_item(&self, kind: ItemKind, id: u32) -> CoreResult<Option<Vec<u8>>> {
        let state = self.lock()?;
        state
            .batch
            .iter()
            .find(|item| item.kind == kind && item.id == id)
            .map(Item::decoded_payload)
            .transpose()
    }

    /// Returns true while items are waiting.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if the lock is unavailable.
    pub fn is_busy(&self) -> CoreResult<bool> {
        Ok(!self.lock()?.batch.is_empty())
    }

    /// Number of pending items.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if the lock is unavailable.
    pub fn len(&self) -> CoreResult<usize> {
        Ok(self.lock()?.batch.len())
    }

    /// Returns true if no items are pending.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if the lock is unavailable.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Sum of pending payload sizes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if the lock is unavailable.
    pub fn total_size(&self) -> CoreResult<usize> {
        Ok(self.lock()?.batch.total_size())
    }

    /// Drops all pending items and resets the retry counter.
    ///
    /// Returns the number of items dropped.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if the lock is unavailable.
    pub fn clear(&self) -> CoreResult<usize> {
        let mut state = self.lock()?;
        state.retry_count = 0;
        Ok(state.batch.clear())
    }

    /// Copies the pending items, for snapshots.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if the lock is unavailable.
    pub fn pending_items(&self) -> CoreResult<Vec<Item>> {
        Ok(self.lock()?.batch.items().to_vec())
    }

    /// Re-admits items loaded from a snapshot, bypassing the filter.
    ///
    /// Items beyond `max_batch_size` are discarded. Returns the number kept.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if the lock is unavailable.
    pub fn restore(&self, items: Vec<Item>) -> CoreResult<usize> {
        let mut state = self.lock()?;
        let room = self.config.max_batch_size.saturating_sub(state.batch.len());
        let mut kept = 0;
        for item in items.into_iter().filter(|i| !i.payload.is_empty()).take(room) {
            state.batch.push(item);
            kept += 1;
        }
        Ok(kept)
    }

    fn ready_locked(&self, state: &PipelineState, now: u64) -> bool {
        let batch = &state.batch;
        batch.len() >= self.config.max_batch_size
            || batch.total_size() >= self.config.buffer_capacity / 2
            || (now.saturating_sub(state.last_sync) >= millis(self.config.flush_interval)
                && !batch.is_empty())
    }

    fn process_locked(&self, state: &mut PipelineState) -> CoreResult<usize> {
        if state.batch.is_empty() {
            return Err(CoreError::BatchEmpty);
        }

        state.batch.sort_by_priority();
        let processor = state.processor.clone();
        let mut visited = 0;

        for index in 0..state.batch.len() {
            if state.batch.get(index).map_or(true, |item| item.processed) {
                continue;
            }

            self.compress_in_place(&mut state.batch, index);

            if let (Some(processor), Some(item)) = (&processor, state.batch.get(index)) {
                if let Err(e) = processor.process(item) {
                    warn!(id = item.id, error = %e, "processor rejected item, pass aborted");
                    return Err(match e {
                        CoreError::CallbackFailure { .. } => e,
                        other => CoreError::callback(item.id, other.to_string()),
                    });
                }
            }

            state.batch.mark_processed(index);
            state.processed_items += 1;
            visited += 1;
        }

        Ok(visited)
    }

    fn compress_in_place(&self, batch: &mut Batch, index: usize) {
        let Some(item) = batch.get(index) else {
            return;
        };
        if item.compressed || item.size() <= self.config.compression_chunk {
            return;
        }

        match tagsync_codec::compress_if_smaller(&item.payload, self.config.compression_level) {
            Ok(Some(packed)) => {
                debug!(id = item.id, from = item.size(), to = packed.len(), "payload compressed");
                batch.replace_payload(index, packed, true);
            }
            Ok(None) => trace!(id = item.id, "compression did not shrink payload"),
            Err(e) => warn!(id = item.id, error = %e, "compression failed, keeping original"),
        }
    }

    fn upload_locked(state: &mut PipelineState) -> CoreResult<usize> {
        if state.batch.is_empty() {
            return Err(CoreError::BatchEmpty);
        }
        let uploader = state.uploader.clone().ok_or(CoreError::NoUploader)?;

        match uploader.upload(&state.batch) {
            Ok(()) => Ok(state.batch.clear()),
            Err(CoreError::UploadFailed(message)) => Err(CoreError::UploadFailed(message)),
            Err(other) => Err(CoreError::upload(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn pipeline() -> (Arc<ManualClock>, Pipeline) {
        let clock = Arc::new(ManualClock::new(0));
        let pipeline = Pipeline::with_defaults(clock.clone());
        (clock, pipeline)
    }

    fn add(pipeline: &Pipeline, id: u32, priority: u32, payload: &[u8]) -> Admission {
        pipeline
            .add_item(ItemKind::Tag, id, payload, priority)
            .unwrap()
    }

    #[test]
    fn admission_copies_payload() {
        let (_clock, pipeline) = pipeline();
        let mut payload = vec![1, 2, 3];
        assert!(add(&pipeline, 1, 0, &payload).is_admitted());
        payload[0] = 99;

        assert_eq!(
            pipeline.find_item(ItemKind::Tag, 1).unwrap(),
            Some(vec![1, 2, 3])
        );
        assert_eq!(pipeline.total_size().unwrap(), 3);
    }

    #[test]
    fn empty_payload_rejected() {
        let (_clock, pipeline) = pipeline();
        assert_eq!(
            add(&pipeline, 1, 0, &[]),
            Admission::Rejected(RejectReason::EmptyPayload)
        );
        assert!(pipeline.is_empty().unwrap());
    }

    #[test]
    fn priority_filter_rejects_without_change() {
        let (_clock, pipeline) = pipeline();
        add(&pipeline, 1, 9, b"keep");
        pipeline.set_filter(Filter::Priority(5)).unwrap();

        assert_eq!(
            add(&pipeline, 2, 4, b"drop me"),
            Admission::Rejected(RejectReason::Filtered)
        );
        assert_eq!(pipeline.len().unwrap(), 1);
        assert_eq!(pipeline.total_size().unwrap(), 4);
        assert!(add(&pipeline, 3, 5, b"ok").is_admitted());
    }

    #[test]
    fn full_batch_rejects() {
        let clock = Arc::new(ManualClock::new(0));
        let pipeline = Pipeline::new(PipelineConfig::default().with_max_batch_size(2), clock);
        add(&pipeline, 1, 0, b"a");
        add(&pipeline, 2, 0, b"b");
        assert_eq!(
            add(&pipeline, 3, 0, b"c"),
            Admission::Rejected(RejectReason::BatchFull)
        );
        assert_eq!(pipeline.total_size().unwrap(), 2);
    }

    #[test]
    fn higher_priority_processed_first() {
        let (_clock, pipeline) = pipeline();
        let order = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&order);
        pipeline
            .set_processor(move |item: &Item| -> CoreResult<()> {
                seen.lock().push(item.id);
                Ok(())
            })
            .unwrap();

        add(&pipeline, 0xA, 1, b"A");
        add(&pipeline, 0xB, 5, b"B");
        assert_eq!(pipeline.process_batch().unwrap(), 2);
        assert_eq!(*order.lock(), vec![0xB, 0xA]);
    }

    #[test]
    fn processor_failure_stops_pass_and_keeps_progress() {
        let (_clock, pipeline) = pipeline();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        pipeline
            .set_processor(move |item: &Item| {
                log.lock().push(item.id);
                if item.id == 2 {
                    Err(CoreError::callback(item.id, "disk full"))
                } else {
                    Ok(())
                }
            })
            .unwrap();

        add(&pipeline, 1, 3, b"one");
        add(&pipeline, 2, 2, b"two");
        add(&pipeline, 3, 1, b"three");

        let err = pipeline.process_batch().unwrap_err();
        assert!(matches!(err, CoreError::CallbackFailure { id: 2, .. }));
        assert_eq!(*seen.lock(), vec![1, 2]);
        assert_eq!(pipeline.stats().unwrap().processed_items, 1);

        let items = pipeline.pending_items().unwrap();
        assert!(items[0].processed);
        assert!(!items[1].processed);
        assert!(!items[2].processed);
    }

    #[test]
    fn compressible_payload_shrinks() {
        let (_clock, pipeline) = pipeline();
        let payload = vec![b'x'; 2000];
        add(&pipeline, 1, 0, &payload);
        pipeline.process_batch().unwrap();

        let item = &pipeline.pending_items().unwrap()[0];
        assert!(item.compressed);
        assert!(item.size() < payload.len());
        assert_eq!(pipeline.total_size().unwrap(), item.size());
        assert_eq!(
            pipeline.find_item(ItemKind::Tag, 1).unwrap(),
            Some(payload)
        );
    }

    #[test]
    fn incompressible_payload_kept_as_is() {
        let (_clock, pipeline) = pipeline();
        // xorshift noise does not compress
        let mut state = 0x2545_f491_u32;
        let payload: Vec<u8> = (0..600)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect();
        add(&pipeline, 1, 0, &payload);
        pipeline.process_batch().unwrap();

        let item = &pipeline.pending_items().unwrap()[0];
        assert!(!item.compressed);
        assert_eq!(item.payload, payload);
        assert_eq!(pipeline.total_size().unwrap(), 600);
    }

    #[test]
    fn small_payload_never_compressed() {
        let (_clock, pipeline) = pipeline();
        add(&pipeline, 1, 0, &[0u8; 512]);
        pipeline.process_batch().unwrap();
        assert!(!pipeline.pending_items().unwrap()[0].compressed);
    }

    #[test]
    fn upload_requires_uploader_and_items() {
        let (_clock, pipeline) = pipeline();
        assert_eq!(pipeline.upload_batch(), Err(CoreError::BatchEmpty));
        add(&pipeline, 1, 0, b"x");
        assert_eq!(pipeline.upload_batch(), Err(CoreError::NoUploader));
    }

    #[test]
    fn failed_upload_retains_batch() {
        let (_clock, pipeline) = pipeline();
        pipeline
            .set_uploader(|_: &Batch| -> CoreResult<()> { Err(CoreError::upload("offline")) })
            .unwrap();
        add(&pipeline, 1, 0, b"x");

        assert!(matches!(
            pipeline.upload_batch(),
            Err(CoreError::UploadFailed(_))
        ));
        assert_eq!(pipeline.len().unwrap(), 1);
    }

    #[test]
    fn forced_flush_after_interval() {
        let clock = Arc::new(ManualClock::new(0));
        let pipeline = Pipeline::new(
            PipelineConfig::default().with_buffer_capacity(4096),
            clock.clone(),
        );
        pipeline
            .set_uploader(|_: &Batch| -> CoreResult<()> { Ok(()) })
            .unwrap();

        for id in 0..4 {
            add(&pipeline, id, 0, &[7u8; 256]);
        }
        assert!(!pipeline.is_ready().unwrap());
        assert_eq!(pipeline.tick().unwrap(), TickOutcome::Idle);

        clock.set(4_999);
        assert_eq!(pipeline.tick().unwrap(), TickOutcome::Idle);

        clock.set(5_000);
        assert!(pipeline.is_ready().unwrap());
        assert_eq!(pipeline.tick().unwrap(), TickOutcome::Uploaded(4));
        assert!(pipeline.is_empty().unwrap());
    }

    #[test]
    fn half_buffer_triggers_flush() {
        let (_clock, pipeline) = pipeline();
        // 2048 bytes reach buffer_capacity / 2
        add(&pipeline, 1, 0, &[1u8; 1024]);
        assert!(!pipeline.is_ready().unwrap());
        add(&pipeline, 2, 0, &[2u8; 1024]);
        assert!(pipeline.is_ready().unwrap());
    }

    #[test]
    fn retry_budget_drops_batch() {
        let (_clock, pipeline) = pipeline();
        let online = Arc::new(AtomicBool::new(false));
        let link = Arc::clone(&online);
        pipeline
            .set_uploader(move |_: &Batch| {
                if link.load(Ordering::SeqCst) {
                    Ok(())
                } else {
                    Err(CoreError::upload("no link"))
                }
            })
            .unwrap();

        for id in 0..32 {
            add(&pipeline, id, 0, b"evt");
        }

        assert_eq!(
            pipeline.tick().unwrap(),
            TickOutcome::UploadFailed { retry_count: 1 }
        );
        assert_eq!(
            pipeline.tick().unwrap(),
            TickOutcome::UploadFailed { retry_count: 2 }
        );
        assert_eq!(pipeline.tick().unwrap(), TickOutcome::Dropped(32));

        let stats = pipeline.stats().unwrap();
        assert_eq!(stats.retry_count, 0);
        assert_eq!(stats.failed_items, 96);
        assert!(pipeline.is_empty().unwrap());
        // the processor ran once per item, retries do not repeat it
        assert_eq!(stats.processed_items, 32);

        online.store(true, Ordering::SeqCst);
        add(&pipeline, 1, 0, b"evt");
        assert!(pipeline.process_batch().is_ok());
    }

    #[test]
    fn success_resets_retry_count() {
        let (clock, pipeline) = pipeline();
        let attempts = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&attempts);
        pipeline
            .set_uploader(move |_: &Batch| {
                let mut n = counter.lock();
                *n += 1;
                if *n == 1 {
                    Err(CoreError::upload("flaky"))
                } else {
                    Ok(())
                }
            })
            .unwrap();

        add(&pipeline, 1, 0, b"evt");
        clock.set(5_000);
        assert_eq!(
            pipeline.tick().unwrap(),
            TickOutcome::UploadFailed { retry_count: 1 }
        );
        assert_eq!(pipeline.tick().unwrap(), TickOutcome::Uploaded(1));
        assert_eq!(pipeline.stats().unwrap().retry_count, 0);

        // last_sync moved to 5000, so a new item waits for the next interval
        add(&pipeline, 2, 0, b"evt");
        clock.set(9_999);
        assert_eq!(pipeline.tick().unwrap(), TickOutcome::Idle);
    }

    #[test]
    fn restore_respects_capacity() {
        let clock = Arc::new(ManualClock::new(0));
        let pipeline = Pipeline::new(PipelineConfig::default().with_max_batch_size(2), clock);
        let items = (0..5)
            .map(|id| Item::new(ItemKind::Route, id, 0, vec![1], 0))
            .collect();
        assert_eq!(pipeline.restore(items).unwrap(), 2);
        assert_eq!(pipeline.len().unwrap(), 2);
    }

    #[test]
    fn clear_empties_batch() {
        let (_clock, pipeline) = pipeline();
        add(&pipeline, 1, 0, b"x");
        assert!(pipeline.is_busy().unwrap());
        assert_eq!(pipeline.clear().unwrap(), 1);
        assert!(!pipeline.is_busy().unwrap());
    }

    proptest! {
        #[test]
        fn processing_order_is_stable_priority_descending(
            priorities in proptest::collection::vec(0u32..4, 1..32)
        ) {
            let (_clock, pipeline) = pipeline();
            let order = Arc::new(Mutex::new(Vec::new()));
            let seen = Arc::clone(&order);
            pipeline
                .set_processor(move |item: &Item| -> CoreResult<()> {
                    seen.lock().push((item.priority, item.id));
                    Ok(())
                })
                .unwrap();

            for (id, &priority) in priorities.iter().enumerate() {
                prop_assert!(add(&pipeline, id as u32, priority, b"x").is_admitted());
            }
            prop_assert_eq!(pipeline.process_batch().unwrap(), priorities.len());

            let order = order.lock();
            for pair in order.windows(2) {
                let ((p0, id0), (p1, id1)) = (pair[0], pair[1]);
                prop_assert!(p0 > p1 || (p0 == p1 && id0 < id1));
            }
        }
    }
}
