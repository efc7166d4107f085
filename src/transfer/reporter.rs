//! Per-task progress sink handed to executors.
//!
//! Events go out as soon as a chunk is reported. Store writes are handed to a
//! background writer that only keeps the newest value, so a slow or locked
//! store never holds up the transfer loop. [`ProgressReporter::flush`] waits
//! for that writer to catch up.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::watch;
use tokio::time::Instant;

use crate::events::{EventSender, TransferEvent, TransferEventKind};
use crate::progress::{self, ProgressSnapshot};
use crate::task::{Direction, TaskId, TaskRepository};

/// Newest value waiting to be persisted. `seq` grows with every report.
#[derive(Debug, Clone, Copy, Default)]
struct PendingWrite {
    seq: u64,
    transferred: u64,
    total: Option<u64>,
}

/// Persists and broadcasts progress for one running task.
///
/// Persistence is best-effort: a failed write is logged and counted, and the
/// transfer carries on.
#[derive(Clone)]
pub struct ProgressReporter {
    task_id: TaskId,
    direction: Direction,
    started: Instant,
    baseline: Arc<AtomicU64>,
    events: EventSender,
    last_transferred: Arc<AtomicU64>,
    dropped_writes: Arc<AtomicUsize>,
    latest: Arc<watch::Sender<PendingWrite>>,
    written: watch::Receiver<u64>,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("task_id", &self.task_id)
            .field("direction", &self.direction)
            .field("last_transferred", &self.last_transferred())
            .finish_non_exhaustive()
    }
}

impl ProgressReporter {
    /// Creates a reporter starting from `already_transferred` bytes.
    ///
    /// Spawns the background writer, so this must run inside a tokio runtime.
    /// The writer exits once every clone of the reporter is dropped.
    #[must_use]
    pub fn new(
        task_id: TaskId,
        direction: Direction,
        already_transferred: u64,
        store: Arc<dyn TaskRepository>,
        events: EventSender,
    ) -> Self {
        let (latest, pending) = watch::channel(PendingWrite::default());
        let (written_tx, written) = watch::channel(0);
        let dropped_writes = Arc::new(AtomicUsize::new(0));

        tokio::spawn(persist_latest(
            task_id,
            store,
            pending,
            written_tx,
            Arc::clone(&dropped_writes),
        ));

        Self {
            task_id,
            direction,
            started: Instant::now(),
            baseline: Arc::new(AtomicU64::new(already_transferred)),
            events,
            last_transferred: Arc::new(AtomicU64::new(already_transferred)),
            dropped_writes,
            latest: Arc::new(latest),
            written,
        }
    }

    /// Sets the byte count this attempt actually started from.
    ///
    /// Speed only counts bytes moved past this point.
    pub fn rebase(&self, offset: u64) {
        self.baseline.store(offset, Ordering::SeqCst);
    }

    /// Records `transferred` of `total` bytes.
    pub fn report(&self, transferred: u64, total: Option<u64>) -> ProgressSnapshot {
        let snapshot = progress::compute_since(
            transferred,
            self.baseline.load(Ordering::SeqCst),
            total,
            self.started,
            Instant::now(),
        );
        self.publish(snapshot);
        snapshot
    }

    /// Records the final 100% snapshot for `total` bytes.
    pub fn finish(&self, total: u64) -> ProgressSnapshot {
        let snapshot = ProgressSnapshot::completed_since(
            total,
            self.baseline.load(Ordering::SeqCst),
            self.started.elapsed(),
        );
        self.publish(snapshot);
        snapshot
    }

    fn publish(&self, snapshot: ProgressSnapshot) {
        self.last_transferred
            .store(snapshot.transferred, Ordering::SeqCst);
        self.latest.send_modify(|pending| {
            pending.seq += 1;
            pending.transferred = snapshot.transferred;
            pending.total = snapshot.total;
        });
        // No subscribers is not an error.
        let _ = self.events.send(TransferEvent::new(
            self.task_id,
            self.direction,
            TransferEventKind::Progress(snapshot),
        ));
    }

    /// Waits until the newest reported value has reached the store.
    ///
    /// A failed write still counts as reached; see
    /// [`ProgressReporter::dropped_writes`].
    pub async fn flush(&self) {
        let target = self.latest.borrow().seq;
        let mut written = self.written.clone();
        // Err means the writer is gone and nothing more will be written.
        let _ = written.wait_for(|seq| *seq >= target).await;
    }

    /// Task this reporter belongs to.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Most recent byte count reported.
    #[must_use]
    pub fn last_transferred(&self) -> u64 {
        self.last_transferred.load(Ordering::SeqCst)
    }

    /// Progress writes that failed to persist.
    #[must_use]
    pub fn dropped_writes(&self) -> usize {
        self.dropped_writes.load(Ordering::Relaxed)
    }
}

/// Background writer: persists the newest pending value, skipping any that
/// were superseded while a write was in flight.
async fn persist_latest(
    task_id: TaskId,
    store: Arc<dyn TaskRepository>,
    mut pending: watch::Receiver<PendingWrite>,
    written: watch::Sender<u64>,
    dropped_writes: Arc<AtomicUsize>,
) {
    while pending.changed().await.is_ok() {
        let write = *pending.borrow_and_update();
        if !store
            .record_progress(task_id, write.transferred, write.total)
            .await
        {
            dropped_writes.fetch_add(1, Ordering::Relaxed);
        }
        written.send_replace(write.seq);
    }
}
