//! Transfer execution: the per-direction executors and their shared plumbing.
//!
//! # Overview
//!
//! - [`TransferExecutor`] - trait the queue managers drive
//! - [`DownloadExecutor`] - ranged GET with local resume
//! - [`UploadExecutor`] - streamed PUT followed by remote status polling
//! - [`HttpClient`] - shared reqwest wrapper with status mapping
//! - [`RetryPolicy`] / [`classify_error`] - what happens after a failure
//! - [`TransferError`] / [`FailureKind`] - error taxonomy

mod client;
mod constants;
mod download;
mod error;
mod reporter;
mod retry;
mod upload;

pub use client::{ClientOptions, HttpClient, accepts_ranges, content_range_total, derive_total_length};
pub use constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_INGEST_PATH, DEFAULT_POLL_INTERVAL, DEFAULT_TASK_STATUS_PATH,
    DEFAULT_UPLOAD_TIMEOUT, FILE_PATH_HEADER, READ_TIMEOUT_SECS,
};
pub use download::DownloadExecutor;
pub use error::{FailureKind, TransferError};
pub use reporter::ProgressReporter;
pub use retry::{
    DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES, FailureClass, RetryDecision,
    RetryPolicy, classify_error, permits_resume,
};
pub use upload::{RemoteTaskState, RemoteTaskStatus, UploadEndpoints, UploadExecutor};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::task::TransferTask;

/// Everything an executor needs besides the task itself.
#[derive(Debug, Clone)]
pub struct TransferContext {
    /// Fires when the queue wants the transfer to stop (cancel, pause, shutdown).
    pub cancel: CancellationToken,
    /// Progress sink for this task.
    pub reporter: ProgressReporter,
}

/// Result of a successful execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Bytes now present at the destination.
    pub transferred: u64,
    /// True when nothing had to move (local file already complete).
    pub skipped: bool,
}

/// Runs one transfer to completion or failure.
///
/// Implementations must return [`TransferError::Cancelled`] promptly once
/// `ctx.cancel` fires, and must not change task status themselves.
#[async_trait]
pub trait TransferExecutor: Send + Sync {
    /// Executes `task`.
    async fn execute(
        &self,
        task: &TransferTask,
        ctx: &TransferContext,
    ) -> Result<TransferOutcome, TransferError>;
}

/// Resolves a remote path against the store base URL.
///
/// Absolute `http(s)://` paths are used as-is; anything else is appended to
/// the base URL path segment by segment, percent-encoding as needed.
pub(crate) fn object_url(base: &Url, remote_path: &str) -> Result<Url, TransferError> {
    if remote_path.starts_with("http://") || remote_path.starts_with("https://") {
        return Url::parse(remote_path).map_err(|_| TransferError::invalid_url(remote_path));
    }

    let mut url = base.clone();
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|()| TransferError::invalid_url(base.as_str()))?;
        segments.pop_if_empty();
        segments.extend(remote_path.split('/').filter(|segment| !segment.is_empty()));
    }
    Ok(url)
}
