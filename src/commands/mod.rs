//! CLI command handlers.

mod control;
mod enqueue;
mod list;
mod run;

pub use control::{
    run_cancel_command, run_clear_command, run_pause_command, run_resume_command,
    run_retry_command,
};
pub use enqueue::{run_download_command, run_upload_command};
pub use list::run_list_command;
pub use run::run_transfers_command;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use transferq_core::{Database, EngineConfig, TaskStore, TransferQueues};
use tracing::debug;

/// Resolved settings every command works from.
#[derive(Debug, Clone)]
pub struct AppContext {
    /// Task database file.
    pub db_path: PathBuf,
    /// Engine settings after config file and environment overrides.
    pub engine: EngineConfig,
}

impl AppContext {
    /// Opens (creating if needed) the task database.
    pub async fn open_store(&self) -> Result<Arc<TaskStore>> {
        if let Some(parent) = self.db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory '{}'", parent.display())
            })?;
        }
        let db = Database::new_with_options(&self.db_path, self.engine.database_options())
            .await
            .with_context(|| format!("Failed to open task database '{}'", self.db_path.display()))?;
        debug!(path = %self.db_path.display(), "task database opened");
        Ok(Arc::new(TaskStore::new(db)))
    }

    /// Builds (but does not start) both queues over `store`.
    pub fn queues(&self, store: Arc<TaskStore>) -> Result<TransferQueues> {
        TransferQueues::from_config(store, &self.engine).context("Failed to set up transfer queues")
    }
}
