//! Repository seam for task persistence.
//!
//! Queue managers and progress reporters depend on this trait rather than on
//! [`TaskStore`] directly, so tests can substitute stores that fail on demand.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::warn;

use super::{
    Direction, NewTask, Result, TaskFilter, TaskId, TaskStatus, TaskStore, TransferTask,
};

/// Data-access contract for transfer tasks.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Inserts a new pending task.
    async fn create(&self, task: &NewTask) -> Result<TaskId>;

    /// Reads one task.
    async fn get(&self, id: TaskId) -> Result<Option<TransferTask>>;

    /// Lifecycle-checked status change.
    async fn update_status(&self, id: TaskId, to: TaskStatus) -> Result<()>;

    /// Records transferred bytes and optionally the learned total.
    async fn update_progress(
        &self,
        id: TaskId,
        transferred_size: i64,
        file_size: Option<i64>,
    ) -> Result<()>;

    /// Marks an active task failed.
    async fn mark_failed_as(
        &self,
        id: TaskId,
        message: &str,
        kind: Option<&str>,
        transferred_size: i64,
        resumable: bool,
    ) -> Result<()>;

    /// Returns an active task to pending with a bumped retry counter.
    async fn schedule_retry(&self, id: TaskId, retry_count: i64, last_error: &str) -> Result<()>;

    /// Zeroes the retry counter.
    async fn reset_retry_count(&self, id: TaskId) -> Result<()>;

    /// Resolves many remote paths with one query.
    async fn batch_lookup_by_remote_path(
        &self,
        remote_paths: &[String],
        direction: Direction,
    ) -> Result<HashMap<String, TransferTask>>;

    /// Newest pending/active/paused task for a path.
    async fn find_open_by_remote_path(
        &self,
        direction: Direction,
        remote_path: &str,
    ) -> Result<Option<TransferTask>>;

    /// Filtered listing ordered by priority then creation.
    async fn list(&self, filter: TaskFilter<'_>) -> Result<Vec<TransferTask>>;

    /// Crash recovery: every `Active` task of a direction back to `Pending`.
    async fn reset_active(&self, direction: Direction) -> Result<u64>;

    /// Bulk delete by status.
    async fn clear_by_status(&self, direction: Direction, status: TaskStatus) -> Result<u64>;

    /// Best-effort progress write. Failures are logged and reported as `false`,
    /// never propagated into the transfer.
    async fn record_progress(&self, id: TaskId, transferred_size: u64, file_size: Option<u64>) -> bool {
        let transferred = i64::try_from(transferred_size).unwrap_or(i64::MAX);
        let total = file_size.and_then(|size| i64::try_from(size).ok());
        match self.update_progress(id, transferred, total).await {
            Ok(()) => true,
            Err(error) => {
                warn!(task_id = id, error = %error, "failed to persist transfer progress");
                false
            }
        }
    }
}

#[async_trait]
impl TaskRepository for TaskStore {
    async fn create(&self, task: &NewTask) -> Result<TaskId> {
        TaskStore::create(self, task).await
    }

    async fn get(&self, id: TaskId) -> Result<Option<TransferTask>> {
        TaskStore::get(self, id).await
    }

    async fn update_status(&self, id: TaskId, to: TaskStatus) -> Result<()> {
        TaskStore::update_status(self, id, to).await
    }

    async fn update_progress(
        &self,
        id: TaskId,
        transferred_size: i64,
        file_size: Option<i64>,
    ) -> Result<()> {
        TaskStore::update_progress(self, id, transferred_size, file_size).await
    }

    async fn mark_failed_as(
        &self,
        id: TaskId,
        message: &str,
        kind: Option<&str>,
        transferred_size: i64,
        resumable: bool,
    ) -> Result<()> {
        TaskStore::mark_failed_as(self, id, message, kind, transferred_size, resumable).await
    }

    async fn schedule_retry(&self, id: TaskId, retry_count: i64, last_error: &str) -> Result<()> {
        TaskStore::schedule_retry(self, id, retry_count, last_error).await
    }

    async fn reset_retry_count(&self, id: TaskId) -> Result<()> {
        TaskStore::reset_retry_count(self, id).await
    }

    async fn batch_lookup_by_remote_path(
        &self,
        remote_paths: &[String],
        direction: Direction,
    ) -> Result<HashMap<String, TransferTask>> {
        TaskStore::batch_lookup_by_remote_path(self, remote_paths, direction).await
    }

    async fn find_open_by_remote_path(
        &self,
        direction: Direction,
        remote_path: &str,
    ) -> Result<Option<TransferTask>> {
        TaskStore::find_open_by_remote_path(self, direction, remote_path).await
    }

    async fn list(&self, filter: TaskFilter<'_>) -> Result<Vec<TransferTask>> {
        TaskStore::list(self, filter).await
    }

    async fn reset_active(&self, direction: Direction) -> Result<u64> {
        TaskStore::reset_active(self, direction).await
    }

    async fn clear_by_status(&self, direction: Direction, status: TaskStatus) -> Result<u64> {
        TaskStore::clear_by_status(self, direction, status).await
    }
}
