//! The sync orchestrator.
//!
//! A session walks `Uploading → Conflict → Downloading → Idle`, moving one
//! item per tick. Any transfer failure ends the session in `Error`. A
//! conflict the merger cannot settle parks the session in `Conflict` until
//! [`SyncOrchestrator::resolve_conflict`] picks a side.

use crate::callbacks::{ConflictMerger, ProgressListener, RejectMerge};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::http::HttpClient;
use crate::state::{SyncBookkeeping, SyncSession, SyncState, SyncStats};
use crate::store::LocalStore;
use crate::transport::{ChunkTransport, UploadOutcome};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tagsync_core::{acquire, millis, BackgroundWorker, Clock, WorkerControl};
use tagsync_sync_protocol::{Conflict, Endpoints, ResolveStrategy, SyncItem};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Name of the session worker thread.
pub const SYNC_WORKER_NAME: &str = "tagsync-sync";

#[derive(Debug, Clone)]
struct Parked {
    item: SyncItem,
    conflict: Conflict,
    choice: Option<ResolveStrategy>,
}

struct OrchestratorState {
    session: SyncSession,
    uploads: VecDeque<SyncItem>,
    downloads: VecDeque<SyncItem>,
    conflicts: VecDeque<SyncItem>,
    parked: Option<Parked>,
    queued_uploads: Vec<String>,
    queued_downloads: Vec<String>,
    in_flight_uploads: Vec<String>,
    in_flight_downloads: Vec<String>,
    server_versions: BTreeMap<String, u64>,
    last_sync: Option<u64>,
    auto_sync: bool,
    sync_interval: Duration,
    stats: SyncStats,
    merger: Arc<dyn ConflictMerger>,
    listener: Option<Arc<dyn ProgressListener>>,
}

impl OrchestratorState {
    fn set_status(&mut self, status: impl Into<String>) {
        self.session.status = status.into();
    }

    fn clear_session_queues(&mut self) {
        self.uploads.clear();
        self.downloads.clear();
        self.conflicts.clear();
        self.parked = None;
    }

    /// Puts the paths a failed or cancelled session took from the queues back.
    fn requeue_in_flight(&mut self) {
        for path in std::mem::take(&mut self.in_flight_uploads) {
            enqueue(&mut self.queued_uploads, path);
        }
        for path in std::mem::take(&mut self.in_flight_downloads) {
            enqueue(&mut self.queued_downloads, path);
        }
    }

    fn known_version(&self, path: &str) -> u64 {
        self.server_versions.get(path).copied().unwrap_or(0)
    }
}

fn enqueue(queue: &mut Vec<String>, path: String) -> bool {
    if queue.contains(&path) {
        false
    } else {
        queue.push(path);
        true
    }
}

fn merge_into(items: &mut Vec<SyncItem>, item: SyncItem) {
    match items.iter_mut().find(|i| i.path == item.path) {
        Some(existing) => existing.merge(&item),
        None => items.push(item),
    }
}

struct Inner {
    config: SyncConfig,
    transport: ChunkTransport,
    store: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
    state: Mutex<OrchestratorState>,
}

impl Inner {
    fn lock(&self) -> SyncResult<MutexGuard<'_, OrchestratorState>> {
        acquire(&self.state, self.config.lock_timeout).ok_or(SyncError::LockTimeout)
    }

    fn transition(&self, st: &mut OrchestratorState, to: SyncState, status: impl Into<String>) {
        let status = status.into();
        info!(from = ?st.session.state, to = ?to, status = %status, "sync state changed");
        st.session.state = to;
        st.session.status = status;
    }

    fn fail(&self, st: &mut OrchestratorState, what: &str, err: SyncError) {
        warn!(what, error = %err, retryable = err.is_retryable(), "sync session failed");
        st.stats.sessions_failed += 1;
        st.stats.last_error = Some(err.to_string());
        st.clear_session_queues();
        st.requeue_in_flight();
        self.transition(st, SyncState::Error, format!("{what} failed: {err}"));
    }

    fn begin_session(&self) -> SyncResult<Uuid> {
        let mut guard = self.lock()?;
        let st = &mut *guard;
        if !st.session.state.can_start_sync() {
            return Err(SyncError::InvalidStateTransition {
                from: st.session.state,
                operation: "start_sync",
            });
        }

        let mut items = Vec::new();
        for change in self.store.pending_changes()? {
            merge_into(&mut items, change);
        }
        let uploads = std::mem::take(&mut st.queued_uploads);
        let downloads = std::mem::take(&mut st.queued_downloads);
        for path in &uploads {
            merge_into(&mut items, SyncItem::upload(path.clone(), st.known_version(path)));
        }
        for path in &downloads {
            merge_into(
                &mut items,
                SyncItem::download(path.clone(), st.known_version(path)),
            );
        }
        st.in_flight_uploads = uploads;
        st.in_flight_downloads = downloads;

        st.clear_session_queues();
        let total = items.len();
        for item in items {
            if item.has_conflict {
                st.conflicts.push_back(item);
            } else if item.needs_upload {
                st.uploads.push_back(item);
            } else if item.needs_download {
                st.downloads.push_back(item);
            }
        }

        let conflicts = st.conflicts.len();
        let id = Uuid::new_v4();
        st.session = SyncSession::begin(
            id,
            u32::try_from(total).unwrap_or(u32::MAX),
            u32::try_from(conflicts).unwrap_or(u32::MAX),
        );
        st.stats.conflicts_detected += conflicts as u64;

        info!(
            session = %id,
            total,
            uploads = st.uploads.len(),
            downloads = st.downloads.len(),
            conflicts,
            "sync session started"
        );
        Ok(id)
    }

    fn tick(&self) -> SyncResult<SyncState> {
        let (state, progress, status, listener) = {
            let mut guard = self.lock()?;
            let st = &mut *guard;
            match st.session.state {
                SyncState::Uploading => self.step_upload(st),
                SyncState::Conflict => self.step_conflict(st),
                SyncState::Downloading => self.step_download(st),
                SyncState::Idle | SyncState::Error => {}
            }
            st.session.refresh_progress();
            (
                st.session.state,
                st.session.progress,
                st.session.status.clone(),
                st.listener.clone(),
            )
        };

        if let Some(listener) = listener {
            listener.on_progress(progress, &status);
        }
        Ok(state)
    }

    fn worker_step(&self) -> WorkerControl {
        match self.tick() {
            Ok(state) if state.is_active() => WorkerControl::Continue,
            Ok(_) => WorkerControl::Exit,
            Err(e) => {
                warn!(error = %e, "sync tick skipped");
                WorkerControl::Continue
            }
        }
    }

    /// Uploads `payload`; returns the stored version, or `None` on conflict.
    fn push(
        &self,
        st: &mut OrchestratorState,
        path: &str,
        payload: &[u8],
        base_version: u64,
    ) -> SyncResult<Option<u64>> {
        match self.transport.upload(path, payload, base_version)? {
            UploadOutcome::Stored(receipt) => {
                st.server_versions.insert(path.to_string(), receipt.version);
                st.stats.items_uploaded += 1;
                st.stats.bytes_uploaded += payload.len() as u64;
                Ok(Some(receipt.version))
            }
            UploadOutcome::Conflict => Ok(None),
        }
    }

    fn push_local(&self, st: &mut OrchestratorState, item: &SyncItem) -> SyncResult<Option<bool>> {
        let Some(payload) = self.store.read(&item.path)? else {
            return Ok(None);
        };
        match self.push(st, &item.path, &payload, item.local_version)? {
            Some(version) => {
                self.store.mark_uploaded(&item.path, version)?;
                Ok(Some(true))
            }
            None => Ok(Some(false)),
        }
    }

    fn push_merged(
        &self,
        st: &mut OrchestratorState,
        conflict: &Conflict,
        merged: &[u8],
    ) -> SyncResult<bool> {
        match self.push(st, &conflict.path, merged, conflict.server_version)? {
            Some(version) => {
                self.store.apply(&conflict.path, merged, version)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn adopt_server(&self, st: &mut OrchestratorState, conflict: &Conflict) -> SyncResult<()> {
        self.store
            .apply(&conflict.path, &conflict.server, conflict.server_version)?;
        st.server_versions
            .insert(conflict.path.clone(), conflict.server_version);
        st.stats.items_downloaded += 1;
        st.stats.bytes_downloaded += conflict.server.len() as u64;
        Ok(())
    }

    fn step_upload(&self, st: &mut OrchestratorState) {
        let Some(mut item) = st.uploads.pop_front() else {
            if st.conflicts.is_empty() {
                self.transition(st, SyncState::Downloading, "uploads complete");
            } else {
                let pending = st.conflicts.len();
                self.transition(
                    st,
                    SyncState::Conflict,
                    format!("uploads complete, {pending} conflicts pending"),
                );
            }
            return;
        };

        match self.push_local(st, &item) {
            Ok(Some(true)) => {
                st.session.processed_items += 1;
                st.set_status(format!("uploaded {}", item.path));
            }
            Ok(Some(false)) => {
                debug!(path = %item.path, "upload conflict");
                st.session.conflict_count += 1;
                st.stats.conflicts_detected += 1;
                st.set_status(format!("conflict on {}", item.path));
                item.mark_conflict();
                st.conflicts.push_back(item);
            }
            Ok(None) => {
                debug!(path = %item.path, "local copy vanished before upload");
                st.session.processed_items += 1;
            }
            Err(e) => self.fail(st, &format!("upload of {}", item.path), e),
        }
    }

    fn load_conflict(&self, path: &str) -> SyncResult<Conflict> {
        let server = self.transport.download(path)?;
        let local = self.store.read(path)?;
        Ok(Conflict::new(
            path,
            local,
            server.payload,
            server.info.version,
        ))
    }

    fn settle(&self, st: &mut OrchestratorState, path: &str, how: &str) {
        st.session.conflict_count = st.session.conflict_count.saturating_sub(1);
        st.session.processed_items += 1;
        st.stats.conflicts_resolved += 1;
        info!(path, how, "conflict resolved");
        st.set_status(format!("resolved {path} ({how})"));
    }

    fn step_conflict(&self, st: &mut OrchestratorState) {
        if st.parked.is_some() {
            let choice = st.parked.as_mut().and_then(|p| p.choice.take());
            if let (Some(strategy), Some(parked)) = (choice, st.parked.take()) {
                self.apply_resolution(st, parked, strategy);
            }
            return;
        }

        let Some(item) = st.conflicts.pop_front() else {
            self.transition(st, SyncState::Downloading, "conflicts settled");
            return;
        };

        let conflict = match self.load_conflict(&item.path) {
            Ok(conflict) => conflict,
            Err(e) => return self.fail(st, &format!("conflict fetch of {}", item.path), e),
        };

        if conflict.is_trivial() {
            match self.adopt_server(st, &conflict) {
                Ok(()) => self.settle(st, &item.path, "identical"),
                Err(e) => self.fail(st, &format!("apply of {}", item.path), e),
            }
            return;
        }

        let merger = Arc::clone(&st.merger);
        match merger.merge(&conflict) {
            Some(merged) => match self.push_merged(st, &conflict, &merged) {
                Ok(true) => self.settle(st, &item.path, "merged"),
                Ok(false) => {
                    st.set_status(format!("{} changed on server, retrying", item.path));
                    st.conflicts.push_back(item);
                }
                Err(e) => self.fail(st, &format!("merge upload of {}", item.path), e),
            },
            None => {
                warn!(path = %item.path, "conflict needs manual resolution");
                st.set_status(format!("conflict in {} needs resolution", item.path));
                st.parked = Some(Parked {
                    item,
                    conflict,
                    choice: None,
                });
            }
        }
    }

    fn apply_resolution(&self, st: &mut OrchestratorState, parked: Parked, strategy: ResolveStrategy) {
        let path = parked.item.path.clone();
        let conflict = &parked.conflict;

        let result = match strategy {
            ResolveStrategy::UseServer => self.adopt_server(st, conflict).map(|()| true),
            ResolveStrategy::UseLocal => match &conflict.local {
                Some(local) => self
                    .push(st, &path, local, conflict.server_version)
                    .and_then(|stored| match stored {
                        Some(version) => self.store.mark_uploaded(&path, version).map(|()| true),
                        None => Ok(false),
                    }),
                None => Err(SyncError::MergeFailed {
                    path: path.clone(),
                    message: "no local copy to keep".into(),
                }),
            },
            ResolveStrategy::Merge => {
                let merger = Arc::clone(&st.merger);
                match merger.merge(conflict) {
                    Some(merged) => self.push_merged(st, conflict, &merged),
                    None => Err(SyncError::MergeFailed {
                        path: path.clone(),
                        message: "merger declined".into(),
                    }),
                }
            }
        };

        match result {
            Ok(true) => self.settle(st, &path, &format!("{strategy:?}")),
            Ok(false) => {
                debug!(path, "server moved again, refetching");
                st.set_status(format!("{path} changed on server, retrying"));
                st.conflicts.push_front(parked.item);
            }
            Err(e @ SyncError::MergeFailed { .. }) => {
                warn!(path, error = %e, "resolution failed, conflict stays parked");
                st.set_status(e.to_string());
                st.parked = Some(Parked {
                    choice: None,
                    ..parked
                });
            }
            Err(e) => self.fail(st, &format!("resolution of {path}"), e),
        }
    }

    fn step_download(&self, st: &mut OrchestratorState) {
        let Some(item) = st.downloads.pop_front() else {
            st.last_sync = Some(self.clock.now_ms());
            st.stats.sessions_completed += 1;
            st.in_flight_uploads.clear();
            st.in_flight_downloads.clear();
            self.transition(st, SyncState::Idle, "sync complete");
            return;
        };

        let result = self.transport.download(&item.path).and_then(|downloaded| {
            self.store
                .apply(&item.path, &downloaded.payload, downloaded.info.version)?;
            Ok(downloaded)
        });

        match result {
            Ok(downloaded) => {
                st.server_versions
                    .insert(item.path.clone(), downloaded.info.version);
                st.stats.items_downloaded += 1;
                st.stats.bytes_downloaded += downloaded.payload.len() as u64;
                st.session.processed_items += 1;
                st.set_status(format!("downloaded {}", item.path));
            }
            Err(e) => self.fail(st, &format!("download of {}", item.path), e),
        }
    }
}

/// Drives sync sessions between a [`LocalStore`] and a remote server.
///
/// All state sits behind one lock. Transfers run on a named worker thread
/// (or on the caller's thread when `manual_ticks` is set) while that lock is
/// held, so queries block for at most one chunk sequence.
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
    worker: Mutex<Option<BackgroundWorker>>,
}

impl SyncOrchestrator {
    /// Creates an idle orchestrator.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Protocol`] if the server URL is unusable or the
    /// chunk size is zero.
    pub fn new(
        config: SyncConfig,
        client: Arc<dyn HttpClient>,
        store: Arc<dyn LocalStore>,
        clock: Arc<dyn Clock>,
    ) -> SyncResult<Self> {
        if config.chunk_size == 0 {
            return Err(SyncError::Protocol("chunk size must be positive".into()));
        }
        let endpoints = Endpoints::new(&config.server_url)?;
        let transport = ChunkTransport::new(
            client,
            endpoints,
            config.chunk_size,
            config.compression_level,
        )
        .with_max_item_size(config.max_item_size);

        let state = OrchestratorState {
            session: SyncSession::idle(),
            uploads: VecDeque::new(),
            downloads: VecDeque::new(),
            conflicts: VecDeque::new(),
            parked: None,
            queued_uploads: Vec::new(),
            queued_downloads: Vec::new(),
            in_flight_uploads: Vec::new(),
            in_flight_downloads: Vec::new(),
            server_versions: BTreeMap::new(),
            last_sync: None,
            auto_sync: config.auto_sync,
            sync_interval: config.sync_interval,
            stats: SyncStats::default(),
            merger: Arc::new(RejectMerge),
            listener: None,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                transport,
                store,
                clock,
                state: Mutex::new(state),
            }),
            worker: Mutex::new(None),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Starts a session and returns its id.
    ///
    /// The pending set is the store's local changes plus the queued paths.
    /// A path that needs both upload and download starts out as a conflict.
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidStateTransition`] unless `Idle`; nothing changes
    /// - the store's error if listing local changes fails
    /// - [`SyncError::WorkerSpawn`] if the worker thread cannot start; the
    ///   session is then in `Error`
    pub fn start_sync(&self) -> SyncResult<Uuid> {
        let mut worker = self.worker.lock();
        let id = self.inner.begin_session()?;

        if !self.inner.config.manual_ticks {
            if let Some(mut finished) = worker.take() {
                finished.stop();
            }
            let inner = Arc::clone(&self.inner);
            match BackgroundWorker::spawn(SYNC_WORKER_NAME, self.inner.config.tick_interval, move || {
                inner.worker_step()
            }) {
                Ok(spawned) => *worker = Some(spawned),
                Err(e) => {
                    let err = SyncError::WorkerSpawn(e.to_string());
                    let mut guard = self.inner.lock()?;
                    self.inner.fail(&mut guard, "worker start", err.clone());
                    return Err(err);
                }
            }
        }
        Ok(id)
    }

    /// Runs one step of the session on the caller's thread.
    ///
    /// Returns the state after the step. The worker calls this every
    /// `tick_interval`; hosts using `manual_ticks` call it themselves.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LockTimeout`] if the lock is unavailable.
    /// Session failures are not errors here; they move the state to `Error`.
    pub fn tick(&self) -> SyncResult<SyncState> {
        self.inner.tick()
    }

    /// Cancels the running session and joins the worker.
    ///
    /// Any state other than `Idle`, including `Error`, ends in `Idle`. The
    /// chunk sequence in flight completes first. Paths taken from the queues
    /// go back to them.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LockTimeout`] if the lock is unavailable.
    pub fn stop_sync(&self) -> SyncResult<()> {
        {
            let mut guard = self.inner.lock()?;
            let st = &mut *guard;
            if st.session.state != SyncState::Idle {
                st.clear_session_queues();
                st.requeue_in_flight();
                self.inner.transition(st, SyncState::Idle, "sync stopped");
            }
        }
        if let Some(mut worker) = self.worker.lock().take() {
            worker.stop();
        }
        Ok(())
    }

    /// Leaves `Error` for `Idle`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidStateTransition`] while a session runs.
    pub fn reset(&self) -> SyncResult<()> {
        let mut guard = self.inner.lock()?;
        let st = &mut *guard;
        match st.session.state {
            SyncState::Idle => Ok(()),
            SyncState::Error => {
                self.inner.transition(st, SyncState::Idle, "idle");
                Ok(())
            }
            from => Err(SyncError::InvalidStateTransition {
                from,
                operation: "reset",
            }),
        }
    }

    /// Chooses how the parked conflict on `path` is settled.
    ///
    /// The choice is applied by the next tick.
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidStateTransition`] outside `Conflict`
    /// - [`SyncError::UnknownConflict`] if `path` is not the parked item
    pub fn resolve_conflict(&self, path: &str, strategy: ResolveStrategy) -> SyncResult<()> {
        {
            let mut guard = self.inner.lock()?;
            let st = &mut *guard;
            if st.session.state != SyncState::Conflict {
                return Err(SyncError::InvalidStateTransition {
                    from: st.session.state,
                    operation: "resolve_conflict",
                });
            }
            match st.parked.as_mut() {
                Some(parked) if parked.item.path == path => parked.choice = Some(strategy),
                _ => {
                    return Err(SyncError::UnknownConflict {
                        path: path.to_string(),
                    })
                }
            }
            debug!(path, ?strategy, "conflict resolution chosen");
            st.set_status(format!("resolving {path} with {strategy:?}"));
        }
        if let Some(worker) = self.worker.lock().as_ref() {
            worker.wake();
        }
        Ok(())
    }

    /// The conflict waiting for [`resolve_conflict`](Self::resolve_conflict).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LockTimeout`] if the lock is unavailable.
    pub fn parked_conflict(&self) -> SyncResult<Option<Conflict>> {
        Ok(self.inner.lock()?.parked.as_ref().map(|p| p.conflict.clone()))
    }

    /// Starts a session if auto-sync is on, the orchestrator is idle and
    /// `sync_interval` has passed since the last completed session.
    ///
    /// # Errors
    ///
    /// Returns the error of [`start_sync`](Self::start_sync), except a lost
    /// race against another start, which yields `Ok(None)`.
    pub fn poll_auto_sync(&self) -> SyncResult<Option<Uuid>> {
        let now = self.inner.clock.now_ms();
        let due = {
            let st = self.inner.lock()?;
            st.auto_sync
                && st.session.state.can_start_sync()
                && st
                    .last_sync
                    .map_or(true, |last| now.saturating_sub(last) >= millis(st.sync_interval))
        };
        if !due {
            return Ok(None);
        }
        match self.start_sync() {
            Ok(id) => Ok(Some(id)),
            Err(SyncError::InvalidStateTransition { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Enables or disables automatic sessions.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LockTimeout`] if the lock is unavailable.
    pub fn set_auto_sync(&self, enabled: bool) -> SyncResult<()> {
        self.inner.lock()?.auto_sync = enabled;
        Ok(())
    }

    /// Sets the minimum time between automatic sessions.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LockTimeout`] if the lock is unavailable.
    pub fn set_sync_interval(&self, interval: Duration) -> SyncResult<()> {
        self.inner.lock()?.sync_interval = interval;
        Ok(())
    }

    /// Installs the automatic conflict merger.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LockTimeout`] if the lock is unavailable.
    pub fn set_merger<M: ConflictMerger + 'static>(&self, merger: M) -> SyncResult<()> {
        self.inner.lock()?.merger = Arc::new(merger);
        Ok(())
    }

    /// Installs the progress listener.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LockTimeout`] if the lock is unavailable.
    pub fn set_progress_listener<L: ProgressListener + 'static>(&self, listener: L) -> SyncResult<()> {
        self.inner.lock()?.listener = Some(Arc::new(listener));
        Ok(())
    }

    /// Queues `path` for upload in the next session.
    ///
    /// Returns false if it was already queued.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LockTimeout`] if the lock is unavailable.
    pub fn queue_upload(&self, path: &str) -> SyncResult<bool> {
        Ok(enqueue(&mut self.inner.lock()?.queued_uploads, path.to_string()))
    }

    /// Queues `path` for download in the next session.
    ///
    /// Returns false if it was already queued.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LockTimeout`] if the lock is unavailable.
    pub fn queue_download(&self, path: &str) -> SyncResult<bool> {
        Ok(enqueue(&mut self.inner.lock()?.queued_downloads, path.to_string()))
    }

    /// Empties both queues and returns how many paths were removed.
    ///
    /// A running session keeps the paths it already took.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LockTimeout`] if the lock is unavailable.
    pub fn clear_queue(&self) -> SyncResult<usize> {
        let mut st = self.inner.lock()?;
        let removed = st.queued_uploads.len() + st.queued_downloads.len();
        st.queued_uploads.clear();
        st.queued_downloads.clear();
        Ok(removed)
    }

    /// Current phase.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LockTimeout`] if the lock is unavailable.
    pub fn state(&self) -> SyncResult<SyncState> {
        Ok(self.inner.lock()?.session.state)
    }

    /// Returns true while a session runs.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LockTimeout`] if the lock is unavailable.
    pub fn is_syncing(&self) -> SyncResult<bool> {
        Ok(self.state()?.is_active())
    }

    /// Copy of the current session.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LockTimeout`] if the lock is unavailable.
    pub fn session(&self) -> SyncResult<SyncSession> {
        Ok(self.inner.lock()?.session.clone())
    }

    /// Current status line.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LockTimeout`] if the lock is unavailable.
    pub fn status(&self) -> SyncResult<String> {
        Ok(self.inner.lock()?.session.status.clone())
    }

    /// Progress of the current session in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LockTimeout`] if the lock is unavailable.
    pub fn progress(&self) -> SyncResult<f32> {
        Ok(self.inner.lock()?.session.progress)
    }

    /// Counters across sessions.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LockTimeout`] if the lock is unavailable.
    pub fn stats(&self) -> SyncResult<SyncStats> {
        Ok(self.inner.lock()?.stats.clone())
    }

    /// State worth persisting across restarts.
    ///
    /// Paths held by a running session are reported as still queued.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LockTimeout`] if the lock is unavailable.
    pub fn bookkeeping(&self) -> SyncResult<SyncBookkeeping> {
        let st = self.inner.lock()?;
        let mut queued_uploads = st.in_flight_uploads.clone();
        for path in &st.queued_uploads {
            enqueue(&mut queued_uploads, path.clone());
        }
        let mut queued_downloads = st.in_flight_downloads.clone();
        for path in &st.queued_downloads {
            enqueue(&mut queued_downloads, path.clone());
        }
        Ok(SyncBookkeeping {
            last_sync: st.last_sync,
            queued_uploads,
            queued_downloads,
            server_versions: st.server_versions.clone(),
        })
    }

    /// Loads persisted bookkeeping. Queues are merged, versions overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidStateTransition`] unless `Idle`.
    pub fn restore_bookkeeping(&self, bookkeeping: SyncBookkeeping) -> SyncResult<()> {
        let mut guard = self.inner.lock()?;
        let st = &mut *guard;
        if !st.session.state.can_start_sync() {
            return Err(SyncError::InvalidStateTransition {
                from: st.session.state,
                operation: "restore_bookkeeping",
            });
        }
        st.last_sync = bookkeeping.last_sync.or(st.last_sync);
        for path in bookkeeping.queued_uploads {
            enqueue(&mut st.queued_uploads, path);
        }
        for path in bookkeeping.queued_downloads {
            enqueue(&mut st.queued_downloads, path);
        }
        st.server_versions.extend(bookkeeping.server_versions);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;
    use crate::store::MemoryLocalStore;
    use tagsync_core::ManualClock;

    struct Fixture {
        remote: Arc<MemoryRemote>,
        store: Arc<MemoryLocalStore>,
        clock: Arc<ManualClock>,
        sync: SyncOrchestrator,
    }

    fn fixture() -> Fixture {
        let remote = Arc::new(MemoryRemote::new());
        let store = Arc::new(MemoryLocalStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let sync = SyncOrchestrator::new(
            SyncConfig::new("http://remote.test/").with_manual_ticks(),
            remote.clone(),
            store.clone(),
            clock.clone(),
        )
        .unwrap();
        Fixture {
            remote,
            store,
            clock,
            sync,
        }
    }

    fn run(sync: &SyncOrchestrator) -> SyncState {
        for _ in 0..100 {
            let state = sync.tick().unwrap();
            if !state.is_active() {
                return state;
            }
        }
        sync.state().unwrap()
    }

    #[test]
    fn empty_session_completes() {
        let f = fixture();
        f.sync.start_sync().unwrap();
        assert_eq!(f.sync.progress().unwrap(), 0.0);
        assert_eq!(run(&f.sync), SyncState::Idle);
        assert_eq!(f.sync.progress().unwrap(), 0.0);
        assert_eq!(f.sync.stats().unwrap().sessions_completed, 1);
        assert_eq!(f.sync.bookkeeping().unwrap().last_sync, Some(0));
    }

    #[test]
    fn start_outside_idle_changes_nothing() {
        let f = fixture();
        f.store.write("a", b"1");
        f.store.write("b", b"2");
        let id = f.sync.start_sync().unwrap();
        f.sync.tick().unwrap();
        let before = f.sync.session().unwrap();

        let err = f.sync.start_sync().unwrap_err();
        assert_eq!(
            err,
            SyncError::InvalidStateTransition {
                from: SyncState::Uploading,
                operation: "start_sync"
            }
        );
        let after = f.sync.session().unwrap();
        assert_eq!(after, before);
        assert_eq!(after.id, Some(id));
    }

    #[test]
    fn uploads_then_downloads() {
        let f = fixture();
        f.store.write("saves/1", b"local save");
        f.remote.put("routes/9", b"server route");
        f.sync.queue_download("routes/9").unwrap();

        f.sync.start_sync().unwrap();
        assert_eq!(f.sync.session().unwrap().total_items, 2);

        assert_eq!(f.sync.tick().unwrap(), SyncState::Uploading);
        assert_eq!(f.sync.progress().unwrap(), 0.5);
        assert_eq!(f.sync.tick().unwrap(), SyncState::Downloading);
        assert_eq!(f.sync.tick().unwrap(), SyncState::Downloading);
        assert_eq!(f.sync.progress().unwrap(), 1.0);
        assert_eq!(f.sync.tick().unwrap(), SyncState::Idle);

        assert_eq!(f.remote.payload("saves/1"), Some(b"local save".to_vec()));
        assert!(!f.store.is_dirty("saves/1"));
        assert_eq!(f.store.get("routes/9"), Some(b"server route".to_vec()));
        assert_eq!(f.store.version("routes/9"), f.remote.version("routes/9"));

        let stats = f.sync.stats().unwrap();
        assert_eq!(stats.items_uploaded, 1);
        assert_eq!(stats.items_downloaded, 1);
        assert!(f.sync.bookkeeping().unwrap().queued_downloads.is_empty());
    }

    #[test]
    fn progress_listener_called_every_tick() {
        let f = fixture();
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        f.sync
            .set_progress_listener(move |progress: f32, status: &str| {
                sink.lock().push((progress, status.to_string()));
            })
            .unwrap();
        f.store.write("a", b"x");

        f.sync.start_sync().unwrap();
        run(&f.sync);

        let reports = reports.lock();
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0], (1.0, "uploaded a".to_string()));
        assert_eq!(reports[2].1, "sync complete");
        assert!(reports.iter().all(|(p, _)| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn transfer_failure_moves_to_error_and_requeues() {
        let f = fixture();
        f.store.insert_synced("a", b"x", 0);
        f.sync.queue_upload("a").unwrap();
        f.remote.fail_path("a", 500);

        f.sync.start_sync().unwrap();
        assert_eq!(run(&f.sync), SyncState::Error);

        let stats = f.sync.stats().unwrap();
        assert_eq!(stats.sessions_failed, 1);
        assert!(stats.last_error.unwrap().contains("500"));
        assert_eq!(f.sync.bookkeeping().unwrap().queued_uploads, vec!["a"]);

        assert!(matches!(
            f.sync.start_sync(),
            Err(SyncError::InvalidStateTransition {
                from: SyncState::Error,
                ..
            })
        ));
        f.sync.reset().unwrap();
        f.remote.heal();
        f.sync.start_sync().unwrap();
        assert_eq!(run(&f.sync), SyncState::Idle);
        assert_eq!(f.remote.payload("a"), Some(b"x".to_vec()));
    }

    #[test]
    fn stop_sync_leaves_error() {
        let f = fixture();
        f.store.insert_synced("a", b"x", 0);
        f.sync.queue_upload("a").unwrap();
        f.remote.fail_path("a", 500);

        f.sync.start_sync().unwrap();
        assert_eq!(run(&f.sync), SyncState::Error);

        f.sync.stop_sync().unwrap();
        assert_eq!(f.sync.state().unwrap(), SyncState::Idle);
        assert_eq!(f.sync.status().unwrap(), "sync stopped");
        assert_eq!(f.sync.bookkeeping().unwrap().queued_uploads, vec!["a"]);

        f.remote.heal();
        f.sync.start_sync().unwrap();
        assert_eq!(run(&f.sync), SyncState::Idle);
        assert_eq!(f.remote.payload("a"), Some(b"x".to_vec()));
    }

    #[test]
    fn upload_conflict_parks_until_resolved() {
        let f = fixture();
        f.store.write("saves/1", b"mine");
        f.remote.put("saves/1", b"theirs");

        f.sync.start_sync().unwrap();
        assert_eq!(f.sync.tick().unwrap(), SyncState::Uploading);
        assert_eq!(f.sync.session().unwrap().conflict_count, 1);
        assert_eq!(f.sync.tick().unwrap(), SyncState::Conflict);
        // fetch both sides, merger declines, item parks
        assert_eq!(f.sync.tick().unwrap(), SyncState::Conflict);

        let parked = f.sync.parked_conflict().unwrap().unwrap();
        assert_eq!(parked.local, Some(b"mine".to_vec()));
        assert_eq!(parked.server, b"theirs".to_vec());

        // stays parked without a choice
        for _ in 0..3 {
            assert_eq!(f.sync.tick().unwrap(), SyncState::Conflict);
        }

        assert!(matches!(
            f.sync.resolve_conflict("other", ResolveStrategy::UseLocal),
            Err(SyncError::UnknownConflict { .. })
        ));
        f.sync
            .resolve_conflict("saves/1", ResolveStrategy::UseLocal)
            .unwrap();
        assert_eq!(f.sync.tick().unwrap(), SyncState::Conflict);
        assert_eq!(f.sync.session().unwrap().conflict_count, 0);
        assert_eq!(run(&f.sync), SyncState::Idle);

        assert_eq!(f.remote.payload("saves/1"), Some(b"mine".to_vec()));
        assert!(!f.store.is_dirty("saves/1"));
        assert_eq!(f.sync.stats().unwrap().conflicts_resolved, 1);
    }

    #[test]
    fn use_server_replaces_local() {
        let f = fixture();
        f.store.write("p", b"mine");
        f.remote.put("p", b"theirs");
        f.sync.start_sync().unwrap();
        while f.sync.parked_conflict().unwrap().is_none() {
            f.sync.tick().unwrap();
        }

        f.sync.resolve_conflict("p", ResolveStrategy::UseServer).unwrap();
        assert_eq!(run(&f.sync), SyncState::Idle);
        assert_eq!(f.store.get("p"), Some(b"theirs".to_vec()));
        assert!(!f.store.is_dirty("p"));
    }

    #[test]
    fn merger_settles_automatically() {
        let f = fixture();
        f.sync
            .set_merger(|c: &Conflict| {
                let mut merged = c.server.clone();
                merged.extend_from_slice(c.local.as_deref()?);
                Some(merged)
            })
            .unwrap();
        f.store.write("log", b"+local");
        f.remote.put("log", b"server");
        f.sync.queue_download("log").unwrap();

        f.sync.start_sync().unwrap();
        // both directions: a conflict from the start
        assert_eq!(f.sync.session().unwrap().conflict_count, 1);
        assert_eq!(run(&f.sync), SyncState::Idle);

        assert_eq!(f.remote.payload("log"), Some(b"server+local".to_vec()));
        assert_eq!(f.store.get("log"), Some(b"server+local".to_vec()));
        assert_eq!(f.store.version("log"), f.remote.version("log"));
        assert_eq!(f.sync.session().unwrap().processed_items, 1);
    }

    #[test]
    fn declined_merge_resolution_stays_parked() {
        let f = fixture();
        f.store.write("p", b"a");
        f.remote.put("p", b"b");
        f.sync.start_sync().unwrap();
        while f.sync.parked_conflict().unwrap().is_none() {
            f.sync.tick().unwrap();
        }

        f.sync.resolve_conflict("p", ResolveStrategy::Merge).unwrap();
        assert_eq!(f.sync.tick().unwrap(), SyncState::Conflict);
        assert!(f.sync.parked_conflict().unwrap().is_some());
        assert!(f.sync.status().unwrap().contains("merger declined"));
    }

    #[test]
    fn resolve_outside_conflict_rejected() {
        let f = fixture();
        assert!(matches!(
            f.sync.resolve_conflict("p", ResolveStrategy::UseLocal),
            Err(SyncError::InvalidStateTransition {
                from: SyncState::Idle,
                ..
            })
        ));
    }

    #[test]
    fn stop_returns_paths_to_queue() {
        let f = fixture();
        f.store.insert_synced("a", b"1", 0);
        f.store.insert_synced("b", b"2", 0);
        f.sync.queue_upload("a").unwrap();
        f.sync.queue_upload("b").unwrap();

        f.sync.start_sync().unwrap();
        f.sync.tick().unwrap();
        f.sync.stop_sync().unwrap();

        assert_eq!(f.sync.state().unwrap(), SyncState::Idle);
        assert_eq!(f.sync.status().unwrap(), "sync stopped");
        assert_eq!(f.sync.bookkeeping().unwrap().queued_uploads, vec!["a", "b"]);
    }

    #[test]
    fn auto_sync_respects_interval() {
        let f = fixture();
        assert_eq!(f.sync.poll_auto_sync().unwrap(), None);

        f.sync.set_auto_sync(true).unwrap();
        f.sync.set_sync_interval(Duration::from_secs(60)).unwrap();
        assert!(f.sync.poll_auto_sync().unwrap().is_some());
        assert_eq!(run(&f.sync), SyncState::Idle);

        f.clock.advance(Duration::from_secs(59));
        assert_eq!(f.sync.poll_auto_sync().unwrap(), None);
        f.clock.advance(Duration::from_secs(1));
        assert!(f.sync.poll_auto_sync().unwrap().is_some());
    }

    #[test]
    fn queue_and_bookkeeping() {
        let f = fixture();
        assert!(f.sync.queue_upload("a").unwrap());
        assert!(!f.sync.queue_upload("a").unwrap());
        assert!(f.sync.queue_download("b").unwrap());

        let saved = f.sync.bookkeeping().unwrap();
        assert_eq!(f.sync.clear_queue().unwrap(), 2);

        f.sync.restore_bookkeeping(saved.clone()).unwrap();
        assert_eq!(f.sync.bookkeeping().unwrap(), saved);
    }

    #[test]
    fn rejects_bad_config() {
        let remote: Arc<dyn HttpClient> = Arc::new(MemoryRemote::new());
        let store: Arc<dyn LocalStore> = Arc::new(MemoryLocalStore::new());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));

        assert!(SyncOrchestrator::new(
            SyncConfig::new("http://x/").with_chunk_size(0),
            remote.clone(),
            store.clone(),
            clock.clone()
        )
        .is_err());
        assert!(matches!(
            SyncOrchestrator::new(SyncConfig::new("::"), remote, store, clock),
            Err(SyncError::Protocol(_))
        ));
    }

    mod progress {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn progress_tracks_processed_over_total(
                uploads in 0usize..24,
                downloads in 0usize..24,
                chunk_size in 1usize..64,
            ) {
                let remote = Arc::new(MemoryRemote::new());
                let store = Arc::new(MemoryLocalStore::new());
                let sync = SyncOrchestrator::new(
                    SyncConfig::new("http://remote.test/")
                        .with_manual_ticks()
                        .with_chunk_size(chunk_size),
                    remote.clone(),
                    store.clone(),
                    Arc::new(ManualClock::new(0)),
                )
                .unwrap();
                for i in 0..uploads {
                    store.write(&format!("up/{i}"), &[i as u8; 40]);
                }
                for i in 0..downloads {
                    let path = format!("down/{i}");
                    remote.put(&path, &[i as u8; 70]);
                    sync.queue_download(&path).unwrap();
                }

                sync.start_sync().unwrap();
                let total = (uploads + downloads) as u32;
                prop_assert_eq!(sync.session().unwrap().total_items, total);

                let mut last = 0.0f32;
                for _ in 0..200 {
                    let state = sync.tick().unwrap();
                    let session = sync.session().unwrap();
                    prop_assert!((0.0..=1.0).contains(&session.progress));
                    prop_assert!(session.processed_items <= session.total_items);
                    let expected = if session.total_items == 0 {
                        0.0
                    } else {
                        session.processed_items as f32 / session.total_items as f32
                    };
                    prop_assert_eq!(session.progress, expected);
                    prop_assert!(session.progress >= last);
                    last = session.progress;
                    if !state.is_active() {
                        break;
                    }
                }

                prop_assert_eq!(sync.state().unwrap(), SyncState::Idle);
                let session = sync.session().unwrap();
                prop_assert_eq!(session.processed_items, total);
                prop_assert_eq!(session.progress, if total == 0 { 0.0 } else { 1.0 });
            }
        }
    }
}
