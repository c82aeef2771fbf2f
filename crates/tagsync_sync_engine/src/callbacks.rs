//! Hooks the host installs on the orchestrator.

use tagsync_sync_protocol::Conflict;

/// Attempts to combine both sides of a conflict automatically.
pub trait ConflictMerger: Send + Sync {
    /// Returns the merged payload, or `None` to park the conflict for the user.
    fn merge(&self, conflict: &Conflict) -> Option<Vec<u8>>;
}

impl<F> ConflictMerger for F
where
    F: Fn(&Conflict) -> Option<Vec<u8>> + Send + Sync,
{
    fn merge(&self, conflict: &Conflict) -> Option<Vec<u8>> {
        self(conflict)
    }
}

/// Merger that declines every conflict.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectMerge;

impl ConflictMerger for RejectMerge {
    fn merge(&self, _conflict: &Conflict) -> Option<Vec<u8>> {
        None
    }
}

/// Receives `(progress, status)` after every worker tick.
///
/// Called outside the orchestrator lock; it may query the orchestrator.
pub trait ProgressListener: Send + Sync {
    /// Reports progress in `[0, 1]` and the current status text.
    fn on_progress(&self, progress: f32, status: &str);
}

impl<F> ProgressListener for F
where
    F: Fn(f32, &str) + Send + Sync,
{
    fn on_progress(&self, progress: f32, status: &str) {
        self(progress, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_merge_declines() {
        let conflict = Conflict::new("a", Some(vec![1]), vec![2], 1);
        assert_eq!(RejectMerge.merge(&conflict), None);
    }

    #[test]
    fn closure_merger() {
        let concat = |c: &Conflict| {
            let mut merged = c.local.clone()?;
            merged.extend_from_slice(&c.server);
            Some(merged)
        };
        let conflict = Conflict::new("a", Some(vec![1]), vec![2], 1);
        assert_eq!(concat.merge(&conflict), Some(vec![1, 2]));
    }
}
