//! Durable transfer task persistence.
//!
//! The task table is the single source of truth for every transfer in both
//! directions. In-memory scheduler state is rebuilt from it on startup.
//!
//! # Overview
//!
//! - [`TaskStore`] - `SQLite`-backed implementation
//! - [`TaskRepository`] - trait seam the queue managers depend on
//! - [`TransferTask`] / [`NewTask`] - stored and to-be-created records
//! - [`TaskStatus`] / [`Direction`] - typed lifecycle and direction
//! - [`StoreError`] - operation error types
//!
//! # Example
//!
//! ```ignore
//! use transferq_core::task::{NewTask, TaskStatus, TaskStore};
//! use transferq_core::Database;
//! use std::path::Path;
//!
//! let db = Database::new(Path::new("transfers.db")).await?;
//! let store = TaskStore::new(db);
//!
//! let id = store.create(&NewTask::download("/reports/q3.pdf", "/tmp/q3.pdf")).await?;
//! store.update_status(id, TaskStatus::Active).await?;
//! store.update_progress(id, 4096, None).await?;
//! store.update_status(id, TaskStatus::Completed).await?;
//! ```

mod error;
mod item;
mod repository;

pub use error::{StoreDbErrorKind, StoreError};
pub use item::{Direction, NewTask, TaskId, TaskStatus, TransferTask};
pub use repository::TaskRepository;

use std::collections::HashMap;

use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::{debug, instrument};

use crate::db::Database;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Returns `Ok(())` if at least one row was affected; otherwise [`StoreError::TaskNotFound`].
fn check_affected(id: TaskId, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        Err(StoreError::TaskNotFound(id))
    } else {
        Ok(())
    }
}

/// Filter for [`TaskStore::list`]. Unset fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskFilter<'a> {
    /// Restrict to one owner.
    pub owner_id: Option<&'a str>,
    /// Restrict to one direction.
    pub direction: Option<Direction>,
    /// Restrict to one status.
    pub status: Option<TaskStatus>,
}

/// `SQLite`-backed task store.
#[derive(Debug, Clone)]
pub struct TaskStore {
    db: Database,
}

impl TaskStore {
    /// Creates a store over an open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts a new task in `Pending` and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails.
    #[instrument(skip(self, task), fields(direction = %task.direction, remote_path = %task.remote_path))]
    pub async fn create(&self, task: &NewTask) -> Result<TaskId> {
        let result = sqlx::query(
            r"INSERT INTO transfer_tasks
                (direction, owner_id, remote_path, local_path, file_name, file_size, priority, status)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(task.direction.as_str())
        .bind(&task.owner_id)
        .bind(&task.remote_path)
        .bind(&task.local_path)
        .bind(&task.file_name)
        .bind(task.file_size)
        .bind(task.priority)
        .bind(TaskStatus::Pending.as_str())
        .execute(self.db.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Gets a task by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get(&self, id: TaskId) -> Result<Option<TransferTask>> {
        let task = sqlx::query_as::<_, TransferTask>(r"SELECT * FROM transfer_tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(task)
    }

    /// Gets a task by id, failing when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TaskNotFound`] or [`StoreError::Database`].
    pub async fn require(&self, id: TaskId) -> Result<TransferTask> {
        self.get(id).await?.ok_or(StoreError::TaskNotFound(id))
    }

    /// Moves a task to `to`, enforcing the lifecycle.
    ///
    /// The write is conditioned on the status that was read, so two racing
    /// writers cannot both succeed. Moving to the current status is a no-op.
    /// Leaving `Failed` or reaching `Completed` clears the recorded error.
    ///
    /// # Errors
    ///
    /// - [`StoreError::TaskNotFound`] if the task does not exist
    /// - [`StoreError::InvalidTransition`] if the lifecycle forbids the move
    /// - [`StoreError::NotResumable`] for `Failed -> Pending` on a permanent failure
    /// - [`StoreError::StatusChanged`] if another writer changed the row first
    #[instrument(skip(self))]
    pub async fn update_status(&self, id: TaskId, to: TaskStatus) -> Result<()> {
        let task = self.require(id).await?;
        let from = task.status();
        if from == to {
            return Ok(());
        }
        if !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition { id, from, to });
        }
        if from == TaskStatus::Failed && !task.resumable {
            return Err(StoreError::NotResumable(id));
        }
        let clear_error = from == TaskStatus::Failed || to == TaskStatus::Completed;

        let result = sqlx::query(
            r"UPDATE transfer_tasks
              SET status = ?,
                  error_message = CASE WHEN ? THEN NULL ELSE error_message END,
                  error_kind = CASE WHEN ? THEN NULL ELSE error_kind END,
                  updated_at = datetime('now')
              WHERE id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(clear_error)
        .bind(clear_error)
        .bind(id)
        .bind(from.as_str())
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::StatusChanged { id, expected: from });
        }
        debug!(%from, %to, "task status changed");
        Ok(())
    }

    /// Records transferred bytes and, when learned, the total size.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TaskNotFound`] if no task exists with the given id.
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self), level = "trace")]
    pub async fn update_progress(
        &self,
        id: TaskId,
        transferred_size: i64,
        file_size: Option<i64>,
    ) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE transfer_tasks
              SET transferred_size = ?,
                  file_size = COALESCE(?, file_size),
                  updated_at = datetime('now')
              WHERE id = ?",
        )
        .bind(transferred_size)
        .bind(file_size.filter(|size| *size > 0))
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Marks an active task failed with a resumable flag of `true`.
    ///
    /// # Errors
    ///
    /// See [`TaskStore::mark_failed_as`].
    pub async fn mark_failed(&self, id: TaskId, message: &str, transferred_size: i64) -> Result<()> {
        self.mark_failed_as(id, message, None, transferred_size, true)
            .await
    }

    /// Marks an active task failed so it can never be resumed, only retried from scratch.
    ///
    /// # Errors
    ///
    /// See [`TaskStore::mark_failed_as`].
    pub async fn mark_failed_permanently(
        &self,
        id: TaskId,
        message: &str,
        transferred_size: i64,
    ) -> Result<()> {
        self.mark_failed_as(id, message, None, transferred_size, false)
            .await
    }

    /// Marks an active task failed, recording message, category, progress and resumability.
    ///
    /// # Errors
    ///
    /// - [`StoreError::TaskNotFound`] if the task does not exist
    /// - [`StoreError::InvalidTransition`] if the task is not `Active`
    /// - [`StoreError::Database`] if the update fails
    #[instrument(skip(self, message), fields(kind = ?kind))]
    pub async fn mark_failed_as(
        &self,
        id: TaskId,
        message: &str,
        kind: Option<&str>,
        transferred_size: i64,
        resumable: bool,
    ) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE transfer_tasks
              SET status = ?,
                  error_message = ?,
                  error_kind = ?,
                  transferred_size = ?,
                  resumable = ?,
                  updated_at = datetime('now')
              WHERE id = ? AND status = ?",
        )
        .bind(TaskStatus::Failed.as_str())
        .bind(message)
        .bind(kind)
        .bind(transferred_size)
        .bind(resumable)
        .bind(id)
        .bind(TaskStatus::Active.as_str())
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            let task = self.require(id).await?;
            return Err(StoreError::InvalidTransition {
                id,
                from: task.status(),
                to: TaskStatus::Failed,
            });
        }
        Ok(())
    }

    /// Returns an active task to `Pending` after a transient failure.
    ///
    /// # Errors
    ///
    /// - [`StoreError::TaskNotFound`] if the task does not exist
    /// - [`StoreError::InvalidTransition`] if the task is not `Active`
    #[instrument(skip(self, last_error))]
    pub async fn schedule_retry(&self, id: TaskId, retry_count: i64, last_error: &str) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE transfer_tasks
              SET status = ?,
                  retry_count = ?,
                  error_message = ?,
                  resumable = 1,
                  updated_at = datetime('now')
              WHERE id = ? AND status = ?",
        )
        .bind(TaskStatus::Pending.as_str())
        .bind(retry_count)
        .bind(last_error)
        .bind(id)
        .bind(TaskStatus::Active.as_str())
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            let task = self.require(id).await?;
            return Err(StoreError::InvalidTransition {
                id,
                from: task.status(),
                to: TaskStatus::Pending,
            });
        }
        Ok(())
    }

    /// Zeroes the automatic retry counter.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TaskNotFound`] if no task exists with the given id.
    #[instrument(skip(self))]
    pub async fn reset_retry_count(&self, id: TaskId) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE transfer_tasks SET retry_count = 0, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Resolves many remote paths in one query.
    ///
    /// When several tasks share a path the most recently created one wins.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self, remote_paths), fields(count = remote_paths.len()))]
    pub async fn batch_lookup_by_remote_path(
        &self,
        remote_paths: &[String],
        direction: Direction,
    ) -> Result<HashMap<String, TransferTask>> {
        if remote_paths.is_empty() {
            return Ok(HashMap::new());
        }

        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT * FROM transfer_tasks WHERE direction = ");
        builder.push_bind(direction.as_str());
        builder.push(" AND remote_path IN (");
        let mut separated = builder.separated(", ");
        for path in remote_paths {
            separated.push_bind(path.as_str());
        }
        separated.push_unseparated(") ORDER BY id ASC");

        let tasks = builder
            .build_query_as::<TransferTask>()
            .fetch_all(self.db.pool())
            .await?;

        Ok(tasks
            .into_iter()
            .map(|task| (task.remote_path.clone(), task))
            .collect())
    }

    /// Finds the newest non-terminal task for a remote path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn find_open_by_remote_path(
        &self,
        direction: Direction,
        remote_path: &str,
    ) -> Result<Option<TransferTask>> {
        let task = sqlx::query_as::<_, TransferTask>(
            r"SELECT * FROM transfer_tasks
              WHERE direction = ? AND remote_path = ? AND status IN (?, ?, ?)
              ORDER BY id DESC
              LIMIT 1",
        )
        .bind(direction.as_str())
        .bind(remote_path)
        .bind(TaskStatus::Pending.as_str())
        .bind(TaskStatus::Active.as_str())
        .bind(TaskStatus::Paused.as_str())
        .fetch_optional(self.db.pool())
        .await?;

        Ok(task)
    }

    /// Lists tasks matching `filter`, ordered by priority then creation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list(&self, filter: TaskFilter<'_>) -> Result<Vec<TransferTask>> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM transfer_tasks WHERE 1 = 1");
        if let Some(owner_id) = filter.owner_id {
            builder.push(" AND owner_id = ").push_bind(owner_id);
        }
        if let Some(direction) = filter.direction {
            builder.push(" AND direction = ").push_bind(direction.as_str());
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        builder.push(" ORDER BY priority ASC, id ASC");

        let tasks = builder
            .build_query_as::<TransferTask>()
            .fetch_all(self.db.pool())
            .await?;

        Ok(tasks)
    }

    /// Lists tasks by owner and status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn list_by_status(
        &self,
        owner_id: Option<&str>,
        status: TaskStatus,
    ) -> Result<Vec<TransferTask>> {
        self.list(TaskFilter {
            owner_id,
            direction: None,
            status: Some(status),
        })
        .await
    }

    /// Returns the count of tasks in a status for one direction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn count_by_status(&self, direction: Direction, status: TaskStatus) -> Result<i64> {
        let row = sqlx::query(
            r"SELECT COUNT(*) AS count FROM transfer_tasks WHERE direction = ? AND status = ?",
        )
        .bind(direction.as_str())
        .bind(status.as_str())
        .fetch_one(self.db.pool())
        .await?;

        Ok(row.get("count"))
    }

    /// Returns every `Active` task of a direction to `Pending`.
    ///
    /// Called once at startup: a task left `Active` means the previous process
    /// died mid-transfer.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn reset_active(&self, direction: Direction) -> Result<u64> {
        let result = sqlx::query(
            r"UPDATE transfer_tasks
              SET status = ?, updated_at = datetime('now')
              WHERE direction = ? AND status = ?",
        )
        .bind(TaskStatus::Pending.as_str())
        .bind(direction.as_str())
        .bind(TaskStatus::Active.as_str())
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Deletes a task that is not currently active.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ActiveTaskRemoval`] if the task is `Active`
    /// - [`StoreError::TaskNotFound`] if no task exists with the given id
    #[instrument(skip(self))]
    pub async fn remove(&self, id: TaskId) -> Result<()> {
        let result = sqlx::query(r"DELETE FROM transfer_tasks WHERE id = ? AND status != ?")
            .bind(id)
            .bind(TaskStatus::Active.as_str())
            .execute(self.db.pool())
            .await?;

        if result.rows_affected() == 0 {
            self.require(id).await?;
            return Err(StoreError::ActiveTaskRemoval(id));
        }
        Ok(())
    }

    /// Deletes all tasks of a direction in `status`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidValue`] when asked to clear `Active` tasks
    /// - [`StoreError::Database`] if the delete fails
    #[instrument(skip(self))]
    pub async fn clear_by_status(&self, direction: Direction, status: TaskStatus) -> Result<u64> {
        if status == TaskStatus::Active {
            return Err(StoreError::invalid_value("status", status.as_str()));
        }

        let result = sqlx::query(r"DELETE FROM transfer_tasks WHERE direction = ? AND status = ?")
            .bind(direction.as_str())
            .bind(status.as_str())
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected())
    }
}
