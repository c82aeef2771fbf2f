//! Sessions driven by the real worker thread.

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tagsync_core::SystemClock;
use tagsync_sync_engine::{
    MemoryLocalStore, MemoryRemote, ResolveStrategy, SyncConfig, SyncError, SyncOrchestrator,
    SyncState,
};

const DEADLINE: Duration = Duration::from_secs(5);

struct Harness {
    remote: Arc<MemoryRemote>,
    store: Arc<MemoryLocalStore>,
    sync: SyncOrchestrator,
}

fn harness(config: SyncConfig) -> Harness {
    let remote = Arc::new(MemoryRemote::new());
    let store = Arc::new(MemoryLocalStore::new());
    let sync = SyncOrchestrator::new(
        config,
        remote.clone(),
        store.clone(),
        Arc::new(SystemClock::new()),
    )
    .unwrap();
    Harness {
        remote,
        store,
        sync,
    }
}

fn fast() -> SyncConfig {
    SyncConfig::new("http://sync.example/api/")
        .with_tick_interval(Duration::from_millis(1))
        .with_chunk_size(64)
}

fn wait_for(sync: &SyncOrchestrator, mut done: impl FnMut(&SyncOrchestrator) -> bool) {
    let start = Instant::now();
    while !done(sync) {
        assert!(start.elapsed() < DEADLINE, "timed out in {:?}", sync.state());
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn full_session_on_worker() {
    let h = harness(fast());
    let big: Vec<u8> = (0..1000u32).flat_map(|i| (i % 7).to_le_bytes()).collect();
    h.store.write("saves/slot1", &big);
    h.store.write("achievements", b"\x01\x02\x03");
    h.remote.put("routes/park", &vec![0xAB; 300]);
    h.sync.queue_download("routes/park").unwrap();

    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);
    h.sync
        .set_progress_listener(move |progress: f32, _status: &str| sink.lock().push(progress))
        .unwrap();

    h.sync.start_sync().unwrap();
    wait_for(&h.sync, |s| s.state().unwrap() == SyncState::Idle);

    assert_eq!(h.remote.payload("saves/slot1"), Some(big));
    assert_eq!(h.remote.payload("achievements"), Some(vec![1, 2, 3]));
    assert_eq!(h.store.get("routes/park"), Some(vec![0xAB; 300]));
    assert!(!h.store.is_dirty("saves/slot1"));

    let session = h.sync.session().unwrap();
    assert_eq!(session.processed_items, 3);
    assert_eq!(session.progress, 1.0);
    assert_eq!(session.status, "sync complete");

    let reports = reports.lock();
    assert!(!reports.is_empty());
    assert!(reports.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn parked_conflict_resolved_while_worker_runs() {
    let h = harness(fast());
    h.store.write("saves/slot1", b"device copy");
    h.remote.put("saves/slot1", b"other device copy");

    h.sync.start_sync().unwrap();
    wait_for(&h.sync, |s| s.parked_conflict().unwrap().is_some());
    assert_eq!(h.sync.state().unwrap(), SyncState::Conflict);
    assert!(h.sync.is_syncing().unwrap());

    h.sync
        .resolve_conflict("saves/slot1", ResolveStrategy::UseServer)
        .unwrap();
    wait_for(&h.sync, |s| s.state().unwrap() == SyncState::Idle);

    assert_eq!(h.store.get("saves/slot1"), Some(b"other device copy".to_vec()));
    let stats = h.sync.stats().unwrap();
    assert_eq!(stats.conflicts_detected, 1);
    assert_eq!(stats.conflicts_resolved, 1);
}

#[test]
fn outage_fails_session_then_reset_recovers() {
    let h = harness(fast());
    h.store.write("a", b"payload");
    h.remote.go_offline(1);

    h.sync.start_sync().unwrap();
    wait_for(&h.sync, |s| s.state().unwrap() == SyncState::Error);
    assert!(h.sync.status().unwrap().contains("connection refused"));
    assert!(matches!(
        h.sync.start_sync(),
        Err(SyncError::InvalidStateTransition { .. })
    ));

    h.sync.reset().unwrap();
    h.sync.start_sync().unwrap();
    wait_for(&h.sync, |s| s.state().unwrap() == SyncState::Idle);
    assert_eq!(h.remote.payload("a"), Some(b"payload".to_vec()));
    assert_eq!(h.sync.stats().unwrap().sessions_failed, 1);
    assert_eq!(h.sync.stats().unwrap().sessions_completed, 1);
}

#[test]
fn stop_sync_cancels_a_stalled_session() {
    let h = harness(fast());
    h.store.write("p", b"mine");
    h.remote.put("p", b"theirs");
    h.sync.queue_upload("p").unwrap();

    h.sync.start_sync().unwrap();
    wait_for(&h.sync, |s| s.parked_conflict().unwrap().is_some());

    h.sync.stop_sync().unwrap();
    assert_eq!(h.sync.state().unwrap(), SyncState::Idle);
    assert!(h.sync.parked_conflict().unwrap().is_none());
    assert_eq!(h.sync.bookkeeping().unwrap().queued_uploads, vec!["p"]);

    // stopping twice is harmless
    h.sync.stop_sync().unwrap();
}
