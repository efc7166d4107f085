//! Resumable download executor.
//!
//! Each attempt:
//! 1. Looks at the local file. A file that already holds the whole object
//!    completes without touching the network. With no known size, any
//!    non-empty file counts as complete (no checksum is involved).
//! 2. Picks a start offset: 0 when the file is missing, otherwise the
//!    on-disk length. Persisted progress can trail the disk (progress writes
//!    are best-effort) but never legitimately leads it. This deliberately
//!    departs from taking the larger of persisted and on-disk sizes: a
//!    persisted value ahead of the disk means the file was truncated, and
//!    resuming past its end would leave a hole of missing bytes.
//! 3. Sends a ranged GET when resuming. A server that advertises neither
//!    `Accept-Ranges` nor `Content-Range` fails the attempt; one that does but
//!    answers 200 restarts the file from byte 0.
//! 4. Streams chunks to disk, reporting progress after each write.

use std::path::Path;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::client::{HttpClient, accepts_ranges, derive_total_length};
use super::{TransferContext, TransferError, TransferExecutor, TransferOutcome, object_url};
use crate::task::TransferTask;

/// Executes download tasks against the remote store.
#[derive(Debug, Clone)]
pub struct DownloadExecutor {
    client: HttpClient,
    base_url: Url,
}

impl DownloadExecutor {
    /// Creates an executor resolving remote paths against `base_url`.
    #[must_use]
    pub fn new(client: HttpClient, base_url: Url) -> Self {
        Self { client, base_url }
    }

    #[instrument(skip(self, task, ctx), fields(task_id = task.id, remote_path = %task.remote_path))]
    async fn download(
        &self,
        task: &TransferTask,
        ctx: &TransferContext,
    ) -> Result<TransferOutcome, TransferError> {
        let local_path = task.local_path();
        let expected = task.expected_size();
        let on_disk = local_file_len(local_path).await?;

        if let Some(len) = on_disk
            && is_already_complete(len, expected)
        {
            info!(bytes = len, "local file already complete, skipping network");
            ctx.reporter.rebase(len);
            ctx.reporter.finish(len);
            return Ok(TransferOutcome {
                transferred: len,
                skipped: true,
            });
        }

        let start = match on_disk {
            Some(len) => {
                let persisted = task.transferred_bytes();
                if persisted > len {
                    warn!(
                        persisted,
                        on_disk = len,
                        "local file shorter than recorded progress, resuming from disk length"
                    );
                }
                len
            }
            None => 0,
        };

        if let Some(parent) = local_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::local_io(parent, e))?;
        }

        let url = object_url(&self.base_url, &task.remote_path)?;
        let url = url.as_str();
        let range_start = (start > 0).then_some(start);

        let response = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return Err(TransferError::Cancelled),
            response = self.client.get(url, range_start) => response?,
        };

        let status = response.status();
        let mut offset = start;
        if start > 0 {
            if !accepts_ranges(response.headers()) {
                return Err(TransferError::resume_unsupported(url, start));
            }
            if status != StatusCode::PARTIAL_CONTENT {
                warn!(
                    status = status.as_u16(),
                    offset = start,
                    "server ignored range request, restarting from byte 0"
                );
                offset = 0;
            }
        }

        ctx.reporter.rebase(offset);
        let total = derive_total_length(status, response.headers(), offset).or(expected);
        debug!(offset, total = ?total, "streaming body");

        let mut file = open_at_offset(local_path, offset).await?;
        let mut stream = response.bytes_stream();
        let mut transferred = offset;

        loop {
            let next = tokio::select! {
                biased;
                () = ctx.cancel.cancelled() => {
                    let _ = file.flush().await;
                    return Err(TransferError::Cancelled);
                }
                next = stream.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|e| TransferError::network(url, e))?;

            file.write_all(&chunk)
                .await
                .map_err(|e| TransferError::local_io(local_path, e))?;
            // Progress is only reported for bytes the OS has accepted.
            file.flush()
                .await
                .map_err(|e| TransferError::local_io(local_path, e))?;

            transferred += chunk.len() as u64;
            ctx.reporter.report(transferred, total);
        }

        if let Some(total) = total
            && transferred < total
        {
            return Err(TransferError::truncated(local_path, total, transferred));
        }

        info!(bytes = transferred, resumed = offset > 0, "download complete");
        ctx.reporter.finish(transferred);
        Ok(TransferOutcome {
            transferred,
            skipped: false,
        })
    }
}

#[async_trait]
impl TransferExecutor for DownloadExecutor {
    async fn execute(
        &self,
        task: &TransferTask,
        ctx: &TransferContext,
    ) -> Result<TransferOutcome, TransferError> {
        self.download(task, ctx).await
    }
}

/// Length of the local file, or `None` when it does not exist.
async fn local_file_len(path: &Path) -> Result<Option<u64>, TransferError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta.len())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(TransferError::local_io(path, e)),
    }
}

/// Skip rule for the local file: full size when known, otherwise non-empty.
fn is_already_complete(on_disk: u64, expected: Option<u64>) -> bool {
    match expected {
        Some(expected) => on_disk >= expected,
        None => on_disk > 0,
    }
}

/// Opens for append when resuming, or creates/truncates when `offset` is 0.
async fn open_at_offset(path: &Path, offset: u64) -> Result<File, TransferError> {
    if offset == 0 {
        return File::create(path)
            .await
            .map_err(|e| TransferError::local_io(path, e));
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| TransferError::local_io(path, e))
}
