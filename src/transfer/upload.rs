//! Upload executor: streamed PUT, then polling until the store finishes ingesting.
//!
//! The ingest endpoint answers `{"task_id": "..."}`. The status endpoint takes
//! `{"task_id": "..."}` and answers `{"state": ..., "progress": 0-100, "error": ...}`.
//! Polling runs every `poll_interval` until a terminal state or until
//! `timeout` has elapsed since polling began. A failed poll request is
//! logged and retried on the next tick; only the ceiling ends the loop.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::time::Instant;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::client::HttpClient;
use super::constants::{
    DEFAULT_INGEST_PATH, DEFAULT_POLL_INTERVAL, DEFAULT_TASK_STATUS_PATH, DEFAULT_UPLOAD_TIMEOUT,
};
use super::{TransferContext, TransferError, TransferExecutor, TransferOutcome, object_url};
use crate::task::TransferTask;

/// Where and how often the upload executor talks to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadEndpoints {
    /// Ingest endpoint path, relative to the base URL.
    pub ingest_path: String,
    /// Status endpoint path, relative to the base URL.
    pub task_status_path: String,
    /// Delay between status polls.
    pub poll_interval: Duration,
    /// Ceiling on the whole polling phase.
    pub timeout: Duration,
}

impl Default for UploadEndpoints {
    fn default() -> Self {
        Self {
            ingest_path: DEFAULT_INGEST_PATH.to_string(),
            task_status_path: DEFAULT_TASK_STATUS_PATH.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_UPLOAD_TIMEOUT,
        }
    }
}

/// Remote ingestion state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteTaskState {
    /// Accepted but not started.
    Pending,
    /// In progress.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished unsuccessfully.
    Failed,
}

/// Body of a status response.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RemoteTaskStatus {
    /// Current state.
    pub state: RemoteTaskState,
    /// Percent complete as reported by the store.
    #[serde(default)]
    pub progress: f64,
    /// Error text for failed tasks.
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IngestReceipt {
    task_id: String,
}

#[derive(Debug, Serialize)]
struct StatusQuery<'a> {
    task_id: &'a str,
}

/// Executes upload tasks against the remote store.
#[derive(Debug, Clone)]
pub struct UploadExecutor {
    client: HttpClient,
    ingest_url: Url,
    status_url: Url,
    poll_interval: Duration,
    timeout: Duration,
}

impl UploadExecutor {
    /// Creates an executor for the store at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidUrl`] if an endpoint path cannot be joined
    /// onto the base URL.
    pub fn new(
        client: HttpClient,
        base_url: &Url,
        endpoints: &UploadEndpoints,
    ) -> Result<Self, TransferError> {
        Ok(Self {
            client,
            ingest_url: object_url(base_url, &endpoints.ingest_path)?,
            status_url: object_url(base_url, &endpoints.task_status_path)?,
            poll_interval: endpoints.poll_interval,
            timeout: endpoints.timeout,
        })
    }

    #[instrument(skip(self, task, ctx), fields(task_id = task.id, remote_path = %task.remote_path))]
    async fn upload(
        &self,
        task: &TransferTask,
        ctx: &TransferContext,
    ) -> Result<TransferOutcome, TransferError> {
        let local_path = task.local_path();
        let file = File::open(local_path)
            .await
            .map_err(|e| TransferError::local_io(local_path, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| TransferError::local_io(local_path, e))?
            .len();

        // Uploads always send the whole file.
        ctx.reporter.rebase(0);
        ctx.reporter.report(0, Some(size));

        let ingest_url = self.ingest_url.as_str();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let response = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return Err(TransferError::Cancelled),
            response = self.client.put_file(ingest_url, &task.remote_path, body, size) => response?,
        };

        let receipt: IngestReceipt = response.json().await.map_err(|e| {
            TransferError::invalid_response(ingest_url, format!("missing task_id: {e}"))
        })?;
        info!(remote_task_id = %receipt.task_id, bytes = size, "upload accepted, awaiting ingestion");

        self.await_remote_task(&receipt.task_id, size, ctx).await
    }

    async fn await_remote_task(
        &self,
        remote_task_id: &str,
        size: u64,
        ctx: &TransferContext,
    ) -> Result<TransferOutcome, TransferError> {
        let deadline = Instant::now() + self.timeout;

        loop {
            tokio::select! {
                biased;
                () = ctx.cancel.cancelled() => return Err(TransferError::Cancelled),
                () = tokio::time::sleep(self.poll_interval) => {}
            }
            if Instant::now() >= deadline {
                return Err(TransferError::timeout(remote_task_id, self.timeout));
            }

            let polled = tokio::select! {
                biased;
                () = ctx.cancel.cancelled() => return Err(TransferError::Cancelled),
                polled = tokio::time::timeout_at(deadline, self.fetch_status(remote_task_id)) => polled,
            };
            let status = match polled {
                Ok(Ok(status)) => status,
                Ok(Err(error)) => {
                    warn!(remote_task_id, error = %error, "status poll failed, will poll again");
                    continue;
                }
                Err(_) => return Err(TransferError::timeout(remote_task_id, self.timeout)),
            };

            match status.state {
                RemoteTaskState::Succeeded => {
                    info!(remote_task_id, "remote ingestion succeeded");
                    ctx.reporter.finish(size);
                    return Ok(TransferOutcome {
                        transferred: size,
                        skipped: false,
                    });
                }
                RemoteTaskState::Failed => {
                    let message = status
                        .error
                        .unwrap_or_else(|| "remote task failed without detail".to_string());
                    return Err(TransferError::remote_task_failed(remote_task_id, message));
                }
                RemoteTaskState::Pending | RemoteTaskState::Running => {
                    debug!(remote_task_id, progress = status.progress, "remote task in flight");
                    ctx.reporter.report(scaled_bytes(size, status.progress), Some(size));
                }
            }
        }
    }

    async fn fetch_status(&self, remote_task_id: &str) -> Result<RemoteTaskStatus, TransferError> {
        let url = self.status_url.as_str();
        let response = self
            .client
            .post_json(url, &StatusQuery {
                task_id: remote_task_id,
            })
            .await?;
        response
            .json::<RemoteTaskStatus>()
            .await
            .map_err(|e| TransferError::invalid_response(url, e.to_string()))
    }
}

#[async_trait]
impl TransferExecutor for UploadExecutor {
    async fn execute(
        &self,
        task: &TransferTask,
        ctx: &TransferContext,
    ) -> Result<TransferOutcome, TransferError> {
        self.upload(task, ctx).await
    }
}

/// Bytes corresponding to a remote percentage, clamped to `size`.
fn scaled_bytes(size: u64, percent: f64) -> u64 {
    if !percent.is_finite() || percent <= 0.0 {
        return 0;
    }
    let percent = percent.min(100.0);
    // Whole-percent resolution is all the store reports.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let whole = percent.round() as u64;
    let bytes = u128::from(size) * u128::from(whole) / 100;
    u64::try_from(bytes).unwrap_or(size).min(size)
}
