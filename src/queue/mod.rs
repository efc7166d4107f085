//! Queue management for upload and download tasks.
//!
//! # Overview
//!
//! The queue system consists of:
//! - [`QueueManager`] - one per direction; admission, lifecycle, retries
//! - [`TransferQueues`] - both managers plus the shared event channel
//! - [`PathClaims`] - local paths held by running tasks, across directions
//! - [`QueueSnapshot`] - tasks grouped by status
//! - [`QueueStats`] - atomic counters per manager
//! - [`QueueError`] - operation error types
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::path::Path;
//!
//! use transferq_core::{Database, EngineConfig, NewTask, TaskStore, TransferQueues};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("transfers.db")).await?;
//! let store = Arc::new(TaskStore::new(db));
//! let queues = TransferQueues::from_config(store, &EngineConfig::default())?;
//!
//! queues.start().await?;
//! let id = queues
//!     .enqueue(NewTask::download("/reports/q3.pdf", "/tmp/q3.pdf"))
//!     .await?;
//! println!("queued task {id}");
//! queues.downloads().wait_until_idle().await;
//! queues.stop().await;
//! # Ok(())
//! # }
//! ```

mod claims;
mod debounce;
mod error;
mod manager;
mod stats;

pub use claims::PathClaims;
pub use debounce::CompletionDebounce;
pub use error::QueueError;
pub use manager::{
    DEFAULT_CONCURRENCY, DEFAULT_DEBOUNCE_WINDOW, MAX_CONCURRENCY, MIN_CONCURRENCY, QueueConfig,
    QueueManager, QueueSnapshot,
};
pub use stats::{QueueStats, QueueStatsSnapshot};

use std::sync::Arc;

use tracing::{info, instrument};

use crate::config::EngineConfig;
use crate::events::{self, EventReceiver, EventSender};
use crate::task::{Direction, NewTask, TaskId, TaskRepository};
use crate::transfer::{DownloadExecutor, HttpClient, UploadExecutor};

/// The upload and download managers of one process.
#[derive(Debug, Clone)]
pub struct TransferQueues {
    uploads: QueueManager,
    downloads: QueueManager,
    events: EventSender,
}

impl TransferQueues {
    /// Bundles two existing managers that publish into `events`.
    ///
    /// # Errors
    ///
    /// - [`QueueError::WrongDirection`] if the managers are swapped
    /// - [`QueueError::SeparatePathClaims`] unless both were built with
    ///   [`QueueManager::with_path_claims`] over the same registry
    pub fn new(
        uploads: QueueManager,
        downloads: QueueManager,
        events: EventSender,
    ) -> Result<Self, QueueError> {
        for (manager, expected) in [
            (&uploads, Direction::Upload),
            (&downloads, Direction::Download),
        ] {
            if manager.direction() != expected {
                return Err(QueueError::WrongDirection {
                    expected,
                    actual: manager.direction(),
                });
            }
        }
        if !uploads
            .path_claims()
            .same_registry(downloads.path_claims())
        {
            return Err(QueueError::SeparatePathClaims);
        }
        Ok(Self {
            uploads,
            downloads,
            events,
        })
    }

    /// Builds both managers with HTTP executors from `config`.
    ///
    /// # Errors
    ///
    /// - [`QueueError::Config`] if the configuration is invalid
    /// - [`QueueError::HttpClient`] if the HTTP client cannot be built
    /// - [`QueueError::Executor`] if an endpoint cannot be resolved
    #[instrument(skip(store, config), fields(base_url = %config.base_url))]
    pub fn from_config(
        store: Arc<dyn TaskRepository>,
        config: &EngineConfig,
    ) -> Result<Self, QueueError> {
        config.validate()?;
        let base_url = config.base_url()?;
        let client = HttpClient::new(&config.client_options()).map_err(QueueError::HttpClient)?;
        let events = events::channel();
        let claims = PathClaims::new();

        let upload_executor =
            UploadExecutor::new(client.clone(), &base_url, &config.upload_endpoints())
                .map_err(QueueError::Executor)?;
        let download_executor = DownloadExecutor::new(client, base_url);

        let uploads = QueueManager::with_path_claims(
            Direction::Upload,
            Arc::clone(&store),
            Arc::new(upload_executor),
            config.queue_config(Direction::Upload),
            events.clone(),
            claims.clone(),
        )?;
        let downloads = QueueManager::with_path_claims(
            Direction::Download,
            store,
            Arc::new(download_executor),
            config.queue_config(Direction::Download),
            events.clone(),
            claims,
        )?;

        Self::new(uploads, downloads, events)
    }

    /// Upload manager.
    #[must_use]
    pub fn uploads(&self) -> &QueueManager {
        &self.uploads
    }

    /// Download manager.
    #[must_use]
    pub fn downloads(&self) -> &QueueManager {
        &self.downloads
    }

    /// Manager for `direction`.
    #[must_use]
    pub fn for_direction(&self, direction: Direction) -> &QueueManager {
        match direction {
            Direction::Upload => &self.uploads,
            Direction::Download => &self.downloads,
        }
    }

    /// Starts both managers. Returns the total number of recovered tasks.
    ///
    /// # Errors
    ///
    /// Returns the first manager's start error.
    pub async fn start(&self) -> Result<u64, QueueError> {
        let uploads = self.uploads.start().await?;
        let downloads = self.downloads.start().await?;
        info!(uploads, downloads, "transfer queues started");
        Ok(uploads + downloads)
    }

    /// Stops both managers, draining them concurrently.
    pub async fn stop(&self) {
        tokio::join!(self.uploads.stop(), self.downloads.stop());
    }

    /// Routes a new task to the manager for its direction.
    ///
    /// # Errors
    ///
    /// See [`QueueManager::enqueue`].
    pub async fn enqueue(&self, task: NewTask) -> Result<TaskId, QueueError> {
        self.for_direction(task.direction).enqueue(task).await
    }

    /// Subscribes to events from both managers.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Resolves once both managers are idle.
    pub async fn wait_until_idle(&self) {
        tokio::join!(
            self.uploads.wait_until_idle(),
            self.downloads.wait_until_idle()
        );
    }
}
