//! Run command handler: execute queued transfers until both queues drain.

use anyhow::Result;
use tokio::sync::broadcast::error::RecvError;
use transferq_core::{QueueStatsSnapshot, TransferEvent, TransferEventKind};
use tracing::{info, warn};

use super::AppContext;
use crate::cli::RunArgs;

/// Totals across both directions for one `run`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub failed: usize,
    pub retried: usize,
    pub cancelled: usize,
    pub recovered: u64,
    pub interrupted: bool,
}

impl RunSummary {
    fn add(&mut self, stats: QueueStatsSnapshot) {
        self.completed += stats.completed;
        self.failed += stats.failed;
        self.retried += stats.retried;
        self.cancelled += stats.cancelled;
    }
}

pub async fn run_transfers_command(ctx: &AppContext, args: &RunArgs) -> Result<RunSummary> {
    let mut ctx = ctx.clone();
    apply_run_overrides(&mut ctx, args);

    let store = ctx.open_store().await?;
    let queues = ctx.queues(store)?;
    let mut events = queues.subscribe();

    let recovered = queues.start().await?;
    if recovered > 0 {
        info!(recovered, "resuming transfers interrupted by a previous run");
    }

    let idle = queues.wait_until_idle();
    tokio::pin!(idle);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut interrupted = false;
    loop {
        tokio::select! {
            biased;
            _ = &mut ctrl_c => {
                warn!("interrupt received, parking active transfers");
                interrupted = true;
                break;
            }
            event = events.recv() => match event {
                Ok(event) => print_event(&event, args.json)?,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event output fell behind, some events were not printed");
                }
                Err(RecvError::Closed) => break,
            },
            () = &mut idle => break,
        }
    }

    queues.stop().await;
    while let Ok(event) = events.try_recv() {
        print_event(&event, args.json)?;
    }

    let mut summary = RunSummary {
        recovered,
        interrupted,
        ..RunSummary::default()
    };
    summary.add(queues.uploads().stats());
    summary.add(queues.downloads().stats());

    info!(
        completed = summary.completed,
        failed = summary.failed,
        retried = summary.retried,
        cancelled = summary.cancelled,
        "run finished"
    );
    Ok(summary)
}

fn apply_run_overrides(ctx: &mut AppContext, args: &RunArgs) {
    if let Some(base_url) = &args.base_url {
        ctx.engine.base_url.clone_from(base_url);
    }
    if let Some(value) = args.upload_concurrency {
        ctx.engine.upload_concurrency = usize::from(value);
    }
    if let Some(value) = args.download_concurrency {
        ctx.engine.download_concurrency = usize::from(value);
    }
    if let Some(value) = args.max_retries {
        ctx.engine.max_retries = u32::from(value);
    }
}

fn print_event(event: &TransferEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
    } else if let Some(line) = render_event(event) {
        println!("{line}");
    }
    Ok(())
}

/// Text form of an event. Progress lines are left to `--json` and `-v`.
fn render_event(event: &TransferEvent) -> Option<String> {
    let prefix = format!("{} #{}", event.direction, event.task_id);
    let line = match &event.kind {
        TransferEventKind::Queued => format!("{prefix} queued"),
        TransferEventKind::Started => format!("{prefix} started"),
        TransferEventKind::Progress(_) => return None,
        TransferEventKind::Retrying {
            retry_count,
            delay,
            error,
        } => format!(
            "{prefix} retry {retry_count} in {:.1}s: {error}",
            delay.as_secs_f64()
        ),
        TransferEventKind::Completed => format!("{prefix} completed"),
        TransferEventKind::Failed {
            failure,
            message,
            resumable,
        } => {
            let hint = if *resumable { "resumable" } else { "not resumable" };
            format!("{prefix} failed [{failure}, {hint}]: {message}")
        }
        TransferEventKind::Paused => format!("{prefix} paused"),
        TransferEventKind::Cancelled => format!("{prefix} cancelled"),
    };
    Some(line)
}
