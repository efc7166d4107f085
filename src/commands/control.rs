//! Task control command handlers: pause, resume, retry, cancel, clear.

use std::sync::Arc;

use anyhow::{Context, Result};
use transferq_core::{Direction, TaskId, TaskStore, TransferQueues};
use tracing::info;

use super::AppContext;
use crate::cli::ClearArgs;

pub async fn run_pause_command(ctx: &AppContext, id: TaskId) -> Result<()> {
    let (queues, direction) = queues_for_task(ctx, id).await?;
    queues
        .for_direction(direction)
        .pause(id)
        .await
        .with_context(|| format!("Failed to pause task {id}"))?;
    println!("paused task {id}");
    Ok(())
}

pub async fn run_resume_command(ctx: &AppContext, id: TaskId) -> Result<()> {
    let (queues, direction) = queues_for_task(ctx, id).await?;
    queues
        .for_direction(direction)
        .resume(id)
        .await
        .with_context(|| format!("Failed to resume task {id}"))?;
    println!("resumed task {id}");
    Ok(())
}

pub async fn run_retry_command(ctx: &AppContext, id: TaskId) -> Result<()> {
    let (queues, direction) = queues_for_task(ctx, id).await?;
    let new_id = queues
        .for_direction(direction)
        .retry(id)
        .await
        .with_context(|| format!("Failed to retry task {id}"))?;
    if new_id == id {
        println!("requeued task {id}");
    } else {
        println!("recreated task {id} as {new_id}");
    }
    Ok(())
}

pub async fn run_cancel_command(ctx: &AppContext, id: TaskId) -> Result<()> {
    let (queues, direction) = queues_for_task(ctx, id).await?;
    queues
        .for_direction(direction)
        .cancel(id)
        .await
        .with_context(|| format!("Failed to cancel task {id}"))?;
    println!("cancelled task {id}");
    Ok(())
}

pub async fn run_clear_command(ctx: &AppContext, args: &ClearArgs) -> Result<()> {
    let store = ctx.open_store().await?;
    let queues = ctx.queues(store)?;
    let directions = match args.direction {
        Some(direction) => vec![direction.into()],
        None => vec![Direction::Upload, Direction::Download],
    };

    let mut removed = 0;
    for direction in directions {
        let manager = queues.for_direction(direction);
        removed += if args.failed {
            manager.clear_failed().await?
        } else {
            manager.clear_completed().await?
        };
    }

    let label = if args.failed {
        "failed/cancelled"
    } else {
        "completed"
    };
    info!(removed, label, "cleared tasks");
    println!("removed {removed} {label} task(s)");
    Ok(())
}

/// Looks up the task's direction so the right manager handles it.
async fn queues_for_task(ctx: &AppContext, id: TaskId) -> Result<(TransferQueues, Direction)> {
    let store: Arc<TaskStore> = ctx.open_store().await?;
    let task = store
        .get(id)
        .await?
        .with_context(|| format!("Task {id} not found"))?;
    let direction = task.direction();
    Ok((ctx.queues(store)?, direction))
}
