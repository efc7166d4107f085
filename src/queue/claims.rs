//! Local paths held by running tasks.
//!
//! One registry is shared by the upload and download managers of a process,
//! so an upload reading a file and a download writing it never overlap.
//! Releasing a path bumps a generation counter that waiting managers watch.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;

use crate::task::TaskId;

/// Concurrent map of local path to the task holding it.
#[derive(Debug, Clone)]
pub struct PathClaims {
    held: Arc<DashMap<String, TaskId>>,
    released: Arc<watch::Sender<u64>>,
}

impl Default for PathClaims {
    fn default() -> Self {
        Self::new()
    }
}

impl PathClaims {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        let (released, _) = watch::channel(0);
        Self {
            held: Arc::new(DashMap::new()),
            released: Arc::new(released),
        }
    }

    /// Claims `path` for `task_id`.
    ///
    /// Returns false when a different task holds it. Claiming a path the task
    /// already holds succeeds.
    pub fn try_claim(&self, path: &str, task_id: TaskId) -> bool {
        match self.held.entry(path.to_string()) {
            Entry::Occupied(entry) => *entry.get() == task_id,
            Entry::Vacant(entry) => {
                entry.insert(task_id);
                true
            }
        }
    }

    /// Releases `path` if `task_id` holds it and wakes waiting managers.
    pub fn release(&self, path: &str, task_id: TaskId) {
        if self
            .held
            .remove_if(path, |_, holder| *holder == task_id)
            .is_some()
        {
            self.released.send_modify(|generation| *generation += 1);
        }
    }

    /// Drops a claim for a task that never started. Watchers are not woken.
    pub fn withdraw(&self, path: &str, task_id: TaskId) {
        self.held.remove_if(path, |_, holder| *holder == task_id);
    }

    /// Task currently holding `path`.
    #[must_use]
    pub fn holder(&self, path: &str) -> Option<TaskId> {
        self.held.get(path).map(|entry| *entry.value())
    }

    /// Number of claimed paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// True when no path is claimed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// True when both handles share one registry.
    #[must_use]
    pub fn same_registry(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.held, &other.held)
    }

    /// Receiver that changes every time a path is released.
    pub(crate) fn watch_releases(&self) -> watch::Receiver<u64> {
        self.released.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_is_exclusive_per_path() {
        let claims = PathClaims::new();
        assert!(claims.try_claim("/data/a.bin", 1));
        assert!(claims.try_claim("/data/a.bin", 1), "re-claim by holder");
        assert!(!claims.try_claim("/data/a.bin", 2));
        assert!(claims.try_claim("/data/b.bin", 2));
        assert_eq!(claims.holder("/data/a.bin"), Some(1));
        assert_eq!(claims.len(), 2);
    }

    #[test]
    fn test_release_only_by_holder() {
        let claims = PathClaims::new();
        assert!(claims.try_claim("/x", 7));

        claims.release("/x", 8);
        assert_eq!(claims.holder("/x"), Some(7));

        claims.release("/x", 7);
        assert!(claims.is_empty());
        assert!(claims.try_claim("/x", 8));

        claims.withdraw("/x", 8);
        assert!(claims.holder("/x").is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let claims = PathClaims::new();
        let other = claims.clone();
        assert!(claims.try_claim("/shared", 1));
        assert!(!other.try_claim("/shared", 2));
        assert!(claims.same_registry(&other));
        assert!(!claims.same_registry(&PathClaims::new()));
    }

    #[tokio::test]
    async fn test_release_wakes_watchers() {
        let claims = PathClaims::new();
        let mut releases = claims.watch_releases();
        assert!(claims.try_claim("/w", 3));

        claims.release("/w", 3);
        tokio::time::timeout(std::time::Duration::from_secs(1), releases.changed())
            .await
            .expect("release should notify")
            .expect("sender alive");
    }
}
