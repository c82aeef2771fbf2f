//! Per-session transfer records.

use serde::{Deserialize, Serialize};

/// One path taking part in a sync session.
///
/// Versions are server-assigned counters; `0` means "never seen".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncItem {
    /// Item path, unique within a session.
    pub path: String,
    /// Version the local copy was derived from.
    pub local_version: u64,
    /// Latest version known on the server.
    pub server_version: u64,
    /// The local copy has changes to send.
    pub needs_upload: bool,
    /// The server has a copy to fetch.
    pub needs_download: bool,
    /// Local and server copies diverged.
    pub has_conflict: bool,
}

impl SyncItem {
    /// An item with local changes based on `local_version`.
    pub fn upload(path: impl Into<String>, local_version: u64) -> Self {
        Self {
            path: path.into(),
            local_version,
            server_version: 0,
            needs_upload: true,
            needs_download: false,
            has_conflict: false,
        }
    }

    /// An item to fetch from the server.
    pub fn download(path: impl Into<String>, server_version: u64) -> Self {
        Self {
            path: path.into(),
            local_version: 0,
            server_version,
            needs_upload: false,
            needs_download: true,
            has_conflict: false,
        }
    }

    /// Folds another record for the same path into this one.
    ///
    /// An item that needs both directions is a conflict.
    pub fn merge(&mut self, other: &SyncItem) {
        self.local_version = self.local_version.max(other.local_version);
        self.server_version = self.server_version.max(other.server_version);
        self.needs_upload |= other.needs_upload;
        self.needs_download |= other.needs_download;
        self.has_conflict |= other.has_conflict || (self.needs_upload && self.needs_download);
    }

    /// Flags the item as conflicting.
    pub fn mark_conflict(&mut self) {
        self.has_conflict = true;
    }
}
