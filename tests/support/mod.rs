//! Shared helpers for integration tests.

#![allow(dead_code)]

pub mod socket_guard;

use std::sync::Arc;

use tempfile::TempDir;
use transferq_core::events::{self, EventSender};
use transferq_core::transfer::{ProgressReporter, TransferContext};
use transferq_core::{Database, Direction, TaskId, TaskStore, TransferEvent};
use tokio_util::sync::CancellationToken;

/// File-backed store in a fresh temp dir. Keep the `TempDir` alive.
pub async fn file_store() -> (TaskStore, TempDir) {
    let temp_dir = TempDir::new().expect("temp dir");
    let db = Database::new(&temp_dir.path().join("tasks.db"))
        .await
        .expect("open database");
    (TaskStore::new(db), temp_dir)
}

/// Executor context wired to `store`, plus the event sender behind it.
pub fn transfer_context(
    store: &TaskStore,
    task_id: TaskId,
    direction: Direction,
    already: u64,
) -> (TransferContext, EventSender) {
    let events = events::channel();
    let reporter = ProgressReporter::new(
        task_id,
        direction,
        already,
        Arc::new(store.clone()),
        events.clone(),
    );
    let ctx = TransferContext {
        cancel: CancellationToken::new(),
        reporter,
    };
    (ctx, events)
}

/// Drains whatever is buffered on a receiver.
pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<TransferEvent>) -> Vec<TransferEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}
