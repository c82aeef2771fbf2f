//! Session state, statistics and bookkeeping.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Phase of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    /// No session is running.
    Idle,
    /// Sending local changes.
    Uploading,
    /// Fetching server changes.
    Downloading,
    /// Settling diverged items.
    Conflict,
    /// The session failed; `reset` returns to `Idle`.
    Error,
}

impl SyncState {
    /// Returns true while a session is running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Uploading | SyncState::Downloading | SyncState::Conflict
        )
    }

    /// Returns true if a new session may start.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, SyncState::Idle)
    }
}

/// The live (or last) session.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSession {
    /// Session id, fresh for every `start_sync`.
    pub id: Option<Uuid>,
    /// Current phase.
    pub state: SyncState,
    /// Items the session has to move.
    pub total_items: u32,
    /// Items finished so far.
    pub processed_items: u32,
    /// Conflicts not yet settled.
    pub conflict_count: u32,
    /// `processed_items / total_items`, 0 when there is nothing to do.
    pub progress: f32,
    /// Human-readable status line.
    pub status: String,
}

impl SyncSession {
    pub(crate) fn idle() -> Self {
        Self {
            id: None,
            state: SyncState::Idle,
            total_items: 0,
            processed_items: 0,
            conflict_count: 0,
            progress: 0.0,
            status: "idle".to_string(),
        }
    }

    pub(crate) fn begin(id: Uuid, total_items: u32, conflict_count: u32) -> Self {
        Self {
            id: Some(id),
            state: SyncState::Uploading,
            total_items,
            processed_items: 0,
            conflict_count,
            progress: 0.0,
            status: "starting sync".to_string(),
        }
    }

    /// Recomputes `progress` from the counters.
    pub(crate) fn refresh_progress(&mut self) {
        self.progress = if self.total_items == 0 {
            0.0
        } else {
            (self.processed_items as f32 / self.total_items as f32).clamp(0.0, 1.0)
        };
    }
}

/// Counters across sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Sessions that reached `Idle` through the download phase.
    pub sessions_completed: u64,
    /// Sessions that ended in `Error`.
    pub sessions_failed: u64,
    /// Items stored on the server.
    pub items_uploaded: u64,
    /// Items applied locally from the server.
    pub items_downloaded: u64,
    /// Conflicts detected.
    pub conflicts_detected: u64,
    /// Conflicts settled automatically or by the user.
    pub conflicts_resolved: u64,
    /// Upload payload bytes (before compression).
    pub bytes_uploaded: u64,
    /// Download payload bytes (after decompression).
    pub bytes_downloaded: u64,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Orchestrator state that outlives a process, for snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncBookkeeping {
    /// Clock time of the last completed session.
    pub last_sync: Option<u64>,
    /// Paths waiting for upload.
    pub queued_uploads: Vec<String>,
    /// Paths waiting for download.
    pub queued_downloads: Vec<String>,
    /// Last known server version per path.
    pub server_versions: BTreeMap<String, u64>,
}
