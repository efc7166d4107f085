//! Transfer task records, directions, and lifecycle states.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::StoreError;

/// Row identifier of a transfer task.
pub type TaskId = i64;

/// Which way the bytes flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Local file pushed to the remote store.
    Upload,
    /// Remote object pulled into a local file.
    Download,
}

impl Direction {
    /// Returns the string representation used in the database.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Download => "download",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(Self::Upload),
            "download" => Ok(Self::Download),
            _ => Err(StoreError::invalid_value("direction", s)),
        }
    }
}

/// Lifecycle state of a transfer task.
///
/// ```text
/// Pending -> Active -> Completed
///    |         |----> Failed ---(resumable)---> Pending
///    |         |----> Pending   (retry scheduled / shutdown)
///    |         |----> Paused -----------------> Pending
///    |         '----> Cancelled
///    |-> Paused
///    '-> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for a concurrency slot.
    Pending,
    /// Currently executing.
    Active,
    /// Suspended by the caller; keeps partial progress.
    Paused,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully; may be resumable.
    Failed,
    /// Stopped by the caller.
    Cancelled,
}

impl TaskStatus {
    /// Returns the string representation used in the database.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// True for states no worker will ever pick up again without an explicit request.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the lifecycle permits moving from `self` to `next`.
    ///
    /// `Failed -> Pending` is allowed here; the store additionally requires the
    /// task to be resumable.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Active | Self::Paused | Self::Cancelled)
                | (
                    Self::Active,
                    Self::Completed | Self::Pending | Self::Failed | Self::Paused | Self::Cancelled
                )
                | (Self::Failed | Self::Paused, Self::Pending)
                | (Self::Paused, Self::Cancelled)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(StoreError::invalid_value("status", s)),
        }
    }
}

/// A persisted transfer task.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct TransferTask {
    /// Unique identifier.
    pub id: TaskId,
    /// Direction as stored (use [`TransferTask::direction`] for the typed value).
    #[sqlx(rename = "direction")]
    #[serde(rename = "direction")]
    pub direction_str: String,
    /// Free-form owner tag used to scope listings.
    pub owner_id: String,
    /// Object path on the remote store; the task's identity within a direction.
    pub remote_path: String,
    /// Path on the local filesystem.
    pub local_path: String,
    /// Display name.
    pub file_name: String,
    /// Expected total bytes, 0 when unknown.
    pub file_size: i64,
    /// Bytes confirmed transferred.
    pub transferred_size: i64,
    /// Status as stored (use [`TransferTask::status`] for the typed value).
    #[sqlx(rename = "status")]
    #[serde(rename = "status")]
    pub status_str: String,
    /// Whether a failed task may continue from its partial progress.
    pub resumable: bool,
    /// Last failure message.
    pub error_message: Option<String>,
    /// Last failure category.
    pub error_kind: Option<String>,
    /// Lower runs first.
    pub priority: i64,
    /// Automatic retries consumed.
    pub retry_count: i64,
    /// When the task was created.
    pub created_at: String,
    /// When the task last changed.
    pub updated_at: String,
}

impl TransferTask {
    /// Returns the status as a typed enum.
    ///
    /// The CHECK constraint keeps stored values valid; an unreadable value falls
    /// back to `Pending` so the task is re-examined rather than lost.
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        self.status_str.parse().unwrap_or(TaskStatus::Pending)
    }

    /// Returns the direction as a typed enum.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction_str.parse().unwrap_or(Direction::Download)
    }

    /// Local file path.
    #[must_use]
    pub fn local_path(&self) -> &Path {
        Path::new(&self.local_path)
    }

    /// Expected size in bytes, if known.
    #[must_use]
    pub fn expected_size(&self) -> Option<u64> {
        u64::try_from(self.file_size).ok().filter(|size| *size > 0)
    }

    /// Persisted transferred byte count.
    #[must_use]
    pub fn transferred_bytes(&self) -> u64 {
        u64::try_from(self.transferred_size).unwrap_or(0)
    }
}

/// Parameters for creating a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    /// Direction of the transfer.
    pub direction: Direction,
    /// Owner tag.
    pub owner_id: String,
    /// Remote object path.
    pub remote_path: String,
    /// Local file path.
    pub local_path: String,
    /// Display name; derived from the path when empty.
    pub file_name: String,
    /// Expected total bytes, 0 when unknown.
    pub file_size: i64,
    /// Lower runs first.
    pub priority: i64,
}

impl NewTask {
    /// A download of `remote_path` into `local_path`.
    #[must_use]
    pub fn download(remote_path: impl Into<String>, local_path: impl Into<String>) -> Self {
        let remote_path = remote_path.into();
        let file_name = last_segment(&remote_path);
        Self {
            direction: Direction::Download,
            owner_id: String::new(),
            remote_path,
            local_path: local_path.into(),
            file_name,
            file_size: 0,
            priority: 0,
        }
    }

    /// An upload of `local_path` to `remote_path`.
    #[must_use]
    pub fn upload(local_path: impl Into<String>, remote_path: impl Into<String>) -> Self {
        let local_path = local_path.into();
        let file_name = last_segment(&local_path);
        Self {
            direction: Direction::Upload,
            owner_id: String::new(),
            remote_path: remote_path.into(),
            local_path,
            file_name,
            file_size: 0,
            priority: 0,
        }
    }

    /// Sets the priority (lower runs first).
    #[must_use]
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the owner tag.
    #[must_use]
    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = owner_id.into();
        self
    }

    /// Sets the expected total size.
    #[must_use]
    pub fn with_file_size(mut self, file_size: u64) -> Self {
        self.file_size = i64::try_from(file_size).unwrap_or(i64::MAX);
        self
    }

    /// Rebuilds creation parameters from an existing task.
    #[must_use]
    pub fn from_task(task: &TransferTask) -> Self {
        Self {
            direction: task.direction(),
            owner_id: task.owner_id.clone(),
            remote_path: task.remote_path.clone(),
            local_path: task.local_path.clone(),
            file_name: task.file_name.clone(),
            file_size: task.file_size,
            priority: task.priority,
        }
    }
}

fn last_segment(path: &str) -> String {
    path.trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or(path)
        .to_string()
}
