//! Integration tests for the cache drain feeding the batch pipeline.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tagsync_core::{
    Batch, CacheConfig, CoreError, CoreResult, Filter, ItemKind, ManualClock, MetricCache,
    Pipeline, PipelineConfig, TickOutcome,
};

fn encode(key: u32, value: u32) -> Vec<u8> {
    let mut payload = key.to_le_bytes().to_vec();
    payload.extend_from_slice(&value.to_le_bytes());
    payload
}

fn decode(payload: &[u8]) -> (u32, u32) {
    let mut key = [0u8; 4];
    let mut value = [0u8; 4];
    key.copy_from_slice(&payload[..4]);
    value.copy_from_slice(&payload[4..8]);
    (u32::from_le_bytes(key), u32::from_le_bytes(value))
}

#[test]
fn drained_metrics_reach_the_uploader() {
    let clock = Arc::new(ManualClock::new(0));
    let cache = MetricCache::new(
        CacheConfig::default().with_batch_size(8),
        clock.clone(),
    );
    let pipeline = Pipeline::new(PipelineConfig::default(), clock.clone());

    let shipped = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&shipped);
    pipeline
        .set_uploader(move |batch: &Batch| -> CoreResult<()> {
            for item in batch {
                sink.lock().push(decode(&item.decoded_payload()?));
            }
            Ok(())
        })
        .unwrap();

    for key in 0..4 {
        cache.update(key, key * 10).unwrap();
    }

    clock.advance(Duration::from_millis(1_000));
    let mut rejected = 0;
    let drained = cache
        .process_batch(&mut |key: u32, value: u32| {
            let admitted = pipeline
                .add_item(ItemKind::Achievement, key, &encode(key, value), 1)
                .map(|a| a.is_admitted())
                .unwrap_or(false);
            if !admitted {
                rejected += 1;
            }
        })
        .unwrap();
    assert_eq!(drained, 4);
    assert_eq!(rejected, 0);
    assert_eq!(pipeline.len().unwrap(), 4);

    clock.advance(Duration::from_millis(5_000));
    assert_eq!(pipeline.tick().unwrap(), TickOutcome::Uploaded(4));

    let mut got = shipped.lock().clone();
    got.sort_unstable();
    assert_eq!(got, vec![(0, 0), (1, 10), (2, 20), (3, 30)]);
}

#[test]
fn checkpoint_survives_concurrent_update() {
    let clock = Arc::new(ManualClock::new(0));
    let cache = MetricCache::with_defaults(clock);

    cache.update(7, 1).unwrap();
    let checkpoint = cache.checkpoint().unwrap();
    cache.update(7, 2).unwrap();

    // the persisted copy predates the second update
    assert!(!cache.mark_synced(checkpoint.revision).unwrap());
    assert!(cache.needs_sync().unwrap());

    let latest = cache.checkpoint().unwrap();
    assert!(cache.mark_synced(latest.revision).unwrap());
    assert!(!cache.needs_sync().unwrap());
}

#[test]
fn filtered_pipeline_keeps_backpressure_visible() {
    let clock = Arc::new(ManualClock::new(0));
    let cache = MetricCache::new(CacheConfig::default().with_capacity(2), clock.clone());
    let pipeline = Pipeline::new(PipelineConfig::default(), clock);
    pipeline.set_filter(Filter::Priority(2)).unwrap();

    cache.update(1, 1).unwrap();
    cache.update(2, 2).unwrap();
    let err = cache.update(3, 3).unwrap_err();
    assert!(err.is_backpressure());
    assert_eq!(err, CoreError::CapacityExceeded { capacity: 2 });

    let admission = pipeline
        .add_item(ItemKind::Achievement, 1, &encode(1, 1), 1)
        .unwrap();
    assert!(!admission.is_admitted());
    assert!(pipeline.is_empty().unwrap());
}
