//! Error types for the queue manager API.

use thiserror::Error;

use crate::config::ConfigError;
use crate::task::{Direction, StoreError, TaskId, TaskStatus};
use crate::transfer::TransferError;

use super::manager::{MAX_CONCURRENCY, MIN_CONCURRENCY};

/// Errors returned by [`super::QueueManager`] and [`super::TransferQueues`].
#[derive(Debug, Error)]
pub enum QueueError {
    /// Task store operation failed.
    #[error("task store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// The manager was stopped and cannot accept work.
    #[error("{direction} queue has been stopped")]
    Stopped {
        /// Queue that was stopped.
        direction: Direction,
    },

    /// A task was handed to the queue for the other direction.
    #[error("task direction {actual} does not match the {expected} queue")]
    WrongDirection {
        /// Direction the queue serves.
        expected: Direction,
        /// Direction of the task.
        actual: Direction,
    },

    /// Bundled managers must share one local-path registry.
    #[error(
        "upload and download queues track local paths separately\n  Suggestion: build both with QueueManager::with_path_claims and the same PathClaims"
    )]
    SeparatePathClaims,

    /// The requested action is not possible in the task's current status.
    #[error("cannot {action} task {id} while it is {status}")]
    InvalidState {
        /// Task id.
        id: TaskId,
        /// Status at the time of the request.
        status: TaskStatus,
        /// Requested action.
        action: &'static str,
    },

    /// The task failed permanently and must be recreated with `retry`.
    #[error("task {0} failed permanently and cannot be resumed\n  Suggestion: use retry to start it over")]
    NotResumable(TaskId),

    /// Engine configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The shared HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    /// An executor could not be constructed.
    #[error("failed to set up transfer executor: {0}")]
    Executor(#[source] TransferError),
}

impl QueueError {
    /// Builds an [`QueueError::InvalidState`].
    #[must_use]
    pub fn invalid_state(id: TaskId, status: TaskStatus, action: &'static str) -> Self {
        Self::InvalidState { id, status, action }
    }

    /// True when the error means the task does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(StoreError::TaskNotFound(_)))
    }
}
