//! Short-lived suppression of re-admission after completion.
//!
//! A remote path that just completed is ignored by admission for a window,
//! so a duplicate enqueue arriving right behind the completion does not start
//! a second transfer of the same object.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Recently completed remote paths with their completion time.
#[derive(Debug)]
pub struct CompletionDebounce {
    window: Duration,
    completed: Mutex<HashMap<String, Instant>>,
}

impl CompletionDebounce {
    /// Creates an empty debounce set with the given window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            completed: Mutex::new(HashMap::new()),
        }
    }

    /// The configured window.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Records that `remote_path` completed now.
    pub fn record(&self, remote_path: &str) {
        if self.window.is_zero() {
            return;
        }
        let mut completed = self
            .completed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        completed.insert(remote_path.to_string(), Instant::now());
    }

    /// True while `remote_path` is inside its window. Expired entries are pruned.
    #[must_use]
    pub fn contains(&self, remote_path: &str) -> bool {
        let now = Instant::now();
        let mut completed = self
            .completed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        completed.retain(|_, at| now.saturating_duration_since(*at) < self.window);
        completed.contains_key(remote_path)
    }

    /// Number of paths currently debounced.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let completed = self
            .completed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        completed
            .values()
            .filter(|at| now.saturating_duration_since(**at) < self.window)
            .count()
    }

    /// True when nothing is debounced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
