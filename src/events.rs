//! Lifecycle and progress notifications.
//!
//! Both queue managers publish into one [`tokio::sync::broadcast`] channel.
//! Subscribers that fall behind lose the oldest events (`RecvError::Lagged`);
//! the task store stays authoritative, so a lagging observer can always
//! re-read state from it.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::progress::ProgressSnapshot;
use crate::task::{Direction, TaskId};
use crate::transfer::FailureKind;

/// Buffered events per subscriber before the oldest are dropped.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Sending half shared by managers and reporters.
pub type EventSender = broadcast::Sender<TransferEvent>;

/// Receiving half handed to subscribers.
pub type EventReceiver = broadcast::Receiver<TransferEvent>;

/// Creates a new event channel.
#[must_use]
pub fn channel() -> EventSender {
    broadcast::channel(EVENT_CHANNEL_CAPACITY).0
}

/// A notification about one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferEvent {
    /// Task the event is about.
    pub task_id: TaskId,
    /// Queue that owns the task.
    pub direction: Direction,
    /// What happened.
    pub kind: TransferEventKind,
}

/// What happened to a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransferEventKind {
    /// Entered (or re-entered) the pending queue.
    Queued,
    /// Admitted into a concurrency slot.
    Started,
    /// Bytes moved.
    Progress(ProgressSnapshot),
    /// Transient failure; will run again after `delay`.
    Retrying {
        /// Retry counter after the increment.
        retry_count: u32,
        /// Backoff before re-admission.
        delay: Duration,
        /// Error that triggered the retry.
        error: String,
    },
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully.
    Failed {
        /// Failure category.
        failure: FailureKind,
        /// Error text.
        message: String,
        /// Whether resume may continue from partial progress.
        resumable: bool,
    },
    /// Suspended by the caller.
    Paused,
    /// Stopped by the caller.
    Cancelled,
}

impl TransferEvent {
    /// Builds an event.
    #[must_use]
    pub fn new(task_id: TaskId, direction: Direction, kind: TransferEventKind) -> Self {
        Self {
            task_id,
            direction,
            kind,
        }
    }

    /// True for events after which the task will not run again on its own.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            TransferEventKind::Completed
                | TransferEventKind::Failed { .. }
                | TransferEventKind::Cancelled
                | TransferEventKind::Paused
        )
    }
}
