//! List command handler: show persisted tasks.

use anyhow::Result;
use transferq_core::progress::percent_of;
use transferq_core::{Direction, TaskFilter, TransferTask};

use super::AppContext;
use crate::cli::ListArgs;

pub async fn run_list_command(ctx: &AppContext, args: &ListArgs) -> Result<()> {
    let store = ctx.open_store().await?;
    let tasks = store
        .list(TaskFilter {
            owner_id: args.owner.as_deref(),
            direction: args.direction.map(Into::into),
            status: args.status.map(Into::into),
        })
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }

    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }

    for task in &tasks {
        println!("{}", render_task_row(task));
    }
    Ok(())
}

/// One line per task: id, direction, status, progress, paths, last error.
pub(crate) fn render_task_row(task: &TransferTask) -> String {
    let progress = match task.expected_size() {
        Some(total) => format!("{:>3}%", percent_of(task.transferred_bytes(), total)),
        None => "   ?".to_string(),
    };
    let (from, to) = match task.direction() {
        Direction::Download => (&task.remote_path, &task.local_path),
        Direction::Upload => (&task.local_path, &task.remote_path),
    };

    let mut row = format!(
        "{:>5}  {:<8}  {:<9}  {progress}  {from} -> {to}",
        task.id,
        task.direction().as_str(),
        task.status().as_str(),
    );
    if task.retry_count > 0 {
        row.push_str(&format!("  (retries: {})", task.retry_count));
    }
    if let Some(error) = &task.error_message {
        row.push_str(&format!("  [{}]", error.lines().next().unwrap_or_default()));
    }
    row
}
