//! Conflict records and manual resolution strategies.

use serde::{Deserialize, Serialize};

/// How a parked conflict is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolveStrategy {
    /// Overwrite the server with the local copy.
    UseLocal,
    /// Replace the local copy with the server's.
    UseServer,
    /// Combine both copies with the configured merger.
    Merge,
}

impl ResolveStrategy {
    /// Converts to a code.
    pub fn to_code(&self) -> u8 {
        match self {
            ResolveStrategy::UseLocal => 1,
            ResolveStrategy::UseServer => 2,
            ResolveStrategy::Merge => 3,
        }
    }

    /// Converts from a code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ResolveStrategy::UseLocal),
            2 => Some(ResolveStrategy::UseServer),
            3 => Some(ResolveStrategy::Merge),
            _ => None,
        }
    }
}

/// Both sides of a diverged item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// Item path.
    pub path: String,
    /// Local payload, if the item exists locally.
    pub local: Option<Vec<u8>>,
    /// Server payload, decompressed.
    pub server: Vec<u8>,
    /// Server version the conflict was observed against.
    pub server_version: u64,
}

impl Conflict {
    /// Creates a conflict record.
    pub fn new(
        path: impl Into<String>,
        local: Option<Vec<u8>>,
        server: Vec<u8>,
        server_version: u64,
    ) -> Self {
        Self {
            path: path.into(),
            local,
            server,
            server_version,
        }
    }

    /// Returns true if only the server has the item.
    pub fn is_local_missing(&self) -> bool {
        self.local.is_none()
    }

    /// Returns true if both sides hold identical bytes.
    pub fn is_trivial(&self) -> bool {
        self.local.as_deref() == Some(self.server.as_slice())
    }
}
