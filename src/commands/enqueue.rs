//! Download and upload command handlers: persist new tasks.

use std::path::Path;

use anyhow::{Context, Result, bail};
use transferq_core::NewTask;
use tracing::info;

use super::AppContext;
use crate::cli::{DownloadArgs, UploadArgs};

pub async fn run_download_command(ctx: &AppContext, args: &DownloadArgs) -> Result<()> {
    let local = absolute_path_string(&args.local)?;
    let mut task = NewTask::download(args.remote.clone(), local)
        .with_priority(args.options.priority)
        .with_owner(args.options.owner.clone());
    if let Some(size) = args.size {
        task = task.with_file_size(size);
    }

    enqueue(ctx, task).await
}

pub async fn run_upload_command(ctx: &AppContext, args: &UploadArgs) -> Result<()> {
    let metadata = std::fs::metadata(&args.local)
        .with_context(|| format!("Cannot read upload source '{}'", args.local.display()))?;
    if !metadata.is_file() {
        bail!("Upload source '{}' is not a file", args.local.display());
    }

    let local = absolute_path_string(&args.local)?;
    let task = NewTask::upload(local, args.remote.clone())
        .with_priority(args.options.priority)
        .with_owner(args.options.owner.clone())
        .with_file_size(metadata.len());

    enqueue(ctx, task).await
}

async fn enqueue(ctx: &AppContext, task: NewTask) -> Result<()> {
    let store = ctx.open_store().await?;
    let queues = ctx.queues(store)?;
    let direction = task.direction;
    let remote_path = task.remote_path.clone();

    let id = queues
        .enqueue(task)
        .await
        .with_context(|| format!("Failed to queue {direction} of '{remote_path}'"))?;

    info!(task_id = id, %direction, remote_path = %remote_path, "task queued");
    println!("queued {direction} task {id}");
    Ok(())
}

/// Tasks outlive the working directory they were queued from.
fn absolute_path_string(path: &Path) -> Result<String> {
    let absolute = std::path::absolute(path)
        .with_context(|| format!("Cannot resolve path '{}'", path.display()))?;
    Ok(absolute.to_string_lossy().into_owned())
}
