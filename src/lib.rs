//! Transfer queue core library
//!
//! Durable, concurrency-bounded queues that move files between the local
//! filesystem and a remote object store, resuming interrupted transfers
//! after network failures and process restarts.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`db`] - Database connection and schema management
//! - [`task`] - Persisted transfer tasks and their lifecycle
//! - [`progress`] - Percentage, speed and remaining-time computation
//! - [`transfer`] - Resumable upload/download executors and retry policy
//! - [`queue`] - Per-direction queue managers
//! - [`events`] - Lifecycle and progress notifications
//! - [`config`] - Engine configuration

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod db;
pub mod events;
pub mod progress;
pub mod queue;
pub mod task;
pub mod transfer;

// Re-export commonly used types
pub use config::{ConfigError, EngineConfig};
pub use db::{Database, DatabaseOptions, DbError};
pub use events::{EventReceiver, TransferEvent, TransferEventKind};
pub use progress::ProgressSnapshot;
pub use queue::{
    PathClaims, QueueConfig, QueueError, QueueManager, QueueSnapshot, QueueStatsSnapshot,
    TransferQueues,
};
pub use task::{
    Direction, NewTask, StoreError, TaskFilter, TaskId, TaskRepository, TaskStatus, TaskStore,
    TransferTask,
};
pub use transfer::{
    DownloadExecutor, FailureKind, HttpClient, RetryPolicy, TransferError, TransferExecutor,
    UploadExecutor,
};
