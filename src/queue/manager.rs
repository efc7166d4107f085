//! Per-direction queue manager: admission, execution and the task lifecycle.
//!
//! One manager owns one direction. Admission scans are serialized behind the
//! scheduler lock; the active set is a concurrent map so executors can leave
//! it without waiting on a scan. Executors run on a [`TaskTracker`] so
//! [`QueueManager::stop`] can drain them.
//!
//! Local paths are claimed in a [`PathClaims`] registry that both directions
//! share, and a task only leaves the active set once its final status write
//! has landed.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use super::claims::PathClaims;
use super::debounce::CompletionDebounce;
use super::error::QueueError;
use super::stats::{QueueStats, QueueStatsSnapshot};
use crate::events::{EventReceiver, EventSender, TransferEvent, TransferEventKind};
use crate::task::{
    Direction, NewTask, StoreError, TaskFilter, TaskId, TaskRepository, TaskStatus, TransferTask,
};
use crate::transfer::{
    ProgressReporter, RetryDecision, RetryPolicy, TransferContext, TransferError,
    TransferExecutor, TransferOutcome,
};

/// Minimum allowed concurrency.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency.
pub const MAX_CONCURRENCY: usize = 100;

/// Default concurrent transfers per direction.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Default window during which a just-completed path is not re-admitted.
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_secs(5);

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// First delay before repeating a failed lifecycle write.
const LIFECYCLE_RETRY_BASE: Duration = Duration::from_millis(50);

/// Cap on the delay between lifecycle write attempts.
const LIFECYCLE_RETRY_MAX: Duration = Duration::from_secs(2);

type Result<T> = std::result::Result<T, QueueError>;

/// Tuning for one queue manager.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum simultaneously active tasks.
    pub concurrency: usize,
    /// Re-admission suppression after completion.
    pub debounce_window: Duration,
    /// Automatic retry behavior.
    pub retry_policy: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Tasks of one direction grouped by status.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueSnapshot {
    /// Waiting for a slot (including those in retry backoff).
    pub pending: Vec<TransferTask>,
    /// Currently transferring.
    pub active: Vec<TransferTask>,
    /// Suspended by the caller.
    pub paused: Vec<TransferTask>,
    /// Finished successfully.
    pub completed: Vec<TransferTask>,
    /// Finished unsuccessfully.
    pub failed: Vec<TransferTask>,
    /// Stopped by the caller.
    pub cancelled: Vec<TransferTask>,
}

impl QueueSnapshot {
    fn from_tasks(tasks: Vec<TransferTask>) -> Self {
        let mut snapshot = Self::default();
        for task in tasks {
            let bucket = match task.status() {
                TaskStatus::Pending => &mut snapshot.pending,
                TaskStatus::Active => &mut snapshot.active,
                TaskStatus::Paused => &mut snapshot.paused,
                TaskStatus::Completed => &mut snapshot.completed,
                TaskStatus::Failed => &mut snapshot.failed,
                TaskStatus::Cancelled => &mut snapshot.cancelled,
            };
            bucket.push(task);
        }
        snapshot
    }

    /// Total number of tasks across all buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
            + self.active.len()
            + self.paused.len()
            + self.completed.len()
            + self.failed.len()
            + self.cancelled.len()
    }

    /// True when the direction has no tasks at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Why a running executor was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    /// Ends `Cancelled`.
    Cancel,
    /// Ends `Paused`.
    Pause,
    /// Ends `Pending` and is admitted again (shutdown, or a resume that
    /// overtook a pause).
    Requeue,
}

impl Interrupt {
    /// A later interrupt replaces an earlier one only if it ranks higher.
    fn rank(self) -> u8 {
        match self {
            Self::Cancel => 2,
            Self::Pause => 1,
            Self::Requeue => 0,
        }
    }
}

/// Result of signalling a running executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    /// Recorded; the executor's exit will honor it.
    Delivered,
    /// The executor already returned and its outcome is being recorded.
    Settled,
}

/// What a resume found on a running task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Revocation {
    /// A pending pause became a requeue.
    Revoked,
    /// No pause was pending.
    NotPausing(Option<Interrupt>),
    /// The executor already returned.
    Settled,
}

#[derive(Debug, Default)]
struct InterruptState {
    reason: Option<Interrupt>,
    settled: bool,
}

/// Active-set entry for a running task.
#[derive(Debug)]
struct ActiveTask {
    cancel: CancellationToken,
    state: Mutex<InterruptState>,
}

impl ActiveTask {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            state: Mutex::new(InterruptState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, InterruptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records `reason` unless a higher-ranked one is pending, then fires the
    /// token.
    fn interrupt(&self, reason: Interrupt) -> Signal {
        {
            let mut state = self.state();
            if state.settled {
                return Signal::Settled;
            }
            if state
                .reason
                .is_none_or(|current| reason.rank() > current.rank())
            {
                state.reason = Some(reason);
            }
        }
        self.cancel.cancel();
        Signal::Delivered
    }

    /// Turns a pending pause into a requeue.
    fn revoke_pause(&self) -> Revocation {
        let mut state = self.state();
        if state.settled {
            return Revocation::Settled;
        }
        match state.reason {
            Some(Interrupt::Pause) => {
                state.reason = Some(Interrupt::Requeue);
                Revocation::Revoked
            }
            other => Revocation::NotPausing(other),
        }
    }

    /// Freezes the interrupt reason once the executor has returned.
    fn settle(&self) -> Option<Interrupt> {
        let mut state = self.state();
        state.settled = true;
        state.reason
    }
}

/// Admission state guarded by the scheduler lock.
#[derive(Debug, Default)]
struct Scheduler {
    /// Remote paths that may have a pending task to admit.
    queued: HashSet<String>,
    /// Remote paths waiting out a retry delay.
    backoff: HashMap<String, Instant>,
}

struct Inner {
    direction: Direction,
    store: Arc<dyn TaskRepository>,
    executor: Arc<dyn TransferExecutor>,
    concurrency: usize,
    retry_policy: RetryPolicy,
    scheduler: tokio::sync::Mutex<Scheduler>,
    active: DashMap<TaskId, Arc<ActiveTask>>,
    claims: PathClaims,
    debounce: CompletionDebounce,
    events: EventSender,
    stats: QueueStats,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    running: AtomicBool,
}

/// Schedules and runs the tasks of one direction.
///
/// Cloning is cheap; clones share the same queue.
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager")
            .field("direction", &self.inner.direction)
            .field("concurrency", &self.inner.concurrency)
            .field("active", &self.inner.active.len())
            .field("running", &self.inner.running.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl QueueManager {
    /// Creates a manager for `direction` with its own local-path registry.
    ///
    /// Nothing runs until [`QueueManager::start`] is called; tasks enqueued
    /// before that are persisted and picked up at start.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidConcurrency`] if the cap is outside 1-100.
    pub fn new(
        direction: Direction,
        store: Arc<dyn TaskRepository>,
        executor: Arc<dyn TransferExecutor>,
        config: QueueConfig,
        events: EventSender,
    ) -> Result<Self> {
        Self::with_path_claims(direction, store, executor, config, events, PathClaims::new())
    }

    /// Creates a manager that claims local paths in a shared `claims`
    /// registry, so it never runs a task on a path another manager is using.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidConcurrency`] if the cap is outside 1-100.
    #[instrument(level = "debug", skip(store, executor, config, events, claims))]
    pub fn with_path_claims(
        direction: Direction,
        store: Arc<dyn TaskRepository>,
        executor: Arc<dyn TransferExecutor>,
        config: QueueConfig,
        events: EventSender,
        claims: PathClaims,
    ) -> Result<Self> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&config.concurrency) {
            return Err(QueueError::InvalidConcurrency {
                value: config.concurrency,
            });
        }

        debug!(
            concurrency = config.concurrency,
            max_retries = config.retry_policy.max_retries(),
            debounce_ms = config.debounce_window.as_millis(),
            "creating queue manager"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                direction,
                store,
                executor,
                concurrency: config.concurrency,
                retry_policy: config.retry_policy,
                scheduler: tokio::sync::Mutex::new(Scheduler::default()),
                active: DashMap::new(),
                claims,
                debounce: CompletionDebounce::new(config.debounce_window),
                events,
                stats: QueueStats::new(),
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                running: AtomicBool::new(false),
            }),
        })
    }

    /// Direction this manager serves.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    /// Concurrency cap.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    /// Local-path registry this manager claims in.
    #[must_use]
    pub fn path_claims(&self) -> &PathClaims {
        &self.inner.claims
    }

    /// Recovers interrupted work and begins admitting tasks.
    ///
    /// Tasks left `Active` by a previous process are returned to `Pending`
    /// first. Returns how many were recovered. Calling `start` on a running
    /// manager does nothing and returns 0.
    ///
    /// # Errors
    ///
    /// - [`QueueError::Stopped`] after [`QueueManager::stop`]
    /// - [`QueueError::Store`] if recovery cannot read or write the store
    #[instrument(skip(self), fields(direction = %self.inner.direction))]
    pub async fn start(&self) -> Result<u64> {
        let inner = &self.inner;
        inner.ensure_not_stopped()?;

        let recovered = {
            let mut scheduler = inner.scheduler.lock().await;
            if inner.running.load(Ordering::SeqCst) {
                return Ok(0);
            }

            let recovered = inner.store.reset_active(inner.direction).await?;
            let pending = inner
                .store
                .list(TaskFilter {
                    direction: Some(inner.direction),
                    status: Some(TaskStatus::Pending),
                    ..TaskFilter::default()
                })
                .await?;
            scheduler
                .queued
                .extend(pending.into_iter().map(|task| task.remote_path));
            inner.running.store(true, Ordering::SeqCst);

            info!(
                recovered,
                queued = scheduler.queued.len(),
                "queue started"
            );
            recovered
        };

        inner
            .stats
            .add_recovered(usize::try_from(recovered).unwrap_or(usize::MAX));
        inner.watch_path_releases();
        inner.admit_logged().await;
        Ok(recovered)
    }

    /// Persists a new task and schedules admission.
    ///
    /// If a pending, active or paused task already exists for the same remote
    /// path, its id is returned and nothing new is created.
    ///
    /// # Errors
    ///
    /// - [`QueueError::WrongDirection`] if the task belongs to the other queue
    /// - [`QueueError::Stopped`] after [`QueueManager::stop`]
    /// - [`QueueError::Store`] if the task cannot be persisted
    #[instrument(skip(self, task), fields(direction = %self.inner.direction, remote_path = %task.remote_path))]
    pub async fn enqueue(&self, task: NewTask) -> Result<TaskId> {
        let inner = &self.inner;
        inner.ensure_direction(task.direction)?;
        inner.ensure_not_stopped()?;

        let id = {
            let mut scheduler = inner.scheduler.lock().await;
            if let Some(existing) = inner
                .store
                .find_open_by_remote_path(inner.direction, &task.remote_path)
                .await?
            {
                debug!(task_id = existing.id, status = %existing.status(), "already queued");
                if existing.status() == TaskStatus::Pending {
                    scheduler.queued.insert(existing.remote_path);
                }
                return Ok(existing.id);
            }

            let id = inner.store.create(&task).await?;
            scheduler.queued.insert(task.remote_path.clone());
            id
        };

        debug!(task_id = id, "task enqueued");
        inner.emit(id, TransferEventKind::Queued);
        inner.admit_logged().await;
        Ok(id)
    }

    /// Suspends a task.
    ///
    /// A pending task becomes `Paused` at once. An active task is interrupted
    /// and becomes `Paused` when its executor stops; a
    /// [`TransferEventKind::Paused`] event follows. Pausing a paused task does
    /// nothing.
    ///
    /// # Errors
    ///
    /// - [`QueueError::InvalidState`] for completed, failed or cancelled tasks
    /// - [`QueueError::Store`] if the task does not exist or the update fails
    #[instrument(skip(self), fields(direction = %self.inner.direction))]
    pub async fn pause(&self, id: TaskId) -> Result<()> {
        let inner = &self.inner;
        loop {
            let mut scheduler = inner.scheduler.lock().await;
            let task = inner.require(id).await?;

            match task.status() {
                TaskStatus::Paused => return Ok(()),
                TaskStatus::Active => {
                    if inner.interrupt_active(&task, Interrupt::Pause, "pause")?
                        == Signal::Delivered
                    {
                        return Ok(());
                    }
                }
                TaskStatus::Pending => {
                    inner.store.update_status(id, TaskStatus::Paused).await?;
                    scheduler.queued.remove(&task.remote_path);
                    drop(scheduler);
                    info!(task_id = id, "task paused");
                    inner.emit(id, TransferEventKind::Paused);
                    return Ok(());
                }
                status => return Err(QueueError::invalid_state(id, status, "pause")),
            }

            drop(scheduler);
            inner.wait_for_exit(id).await;
        }
    }

    /// Returns a paused or resumable failed task to the queue.
    ///
    /// The automatic retry counter starts over. Pending and running tasks are
    /// left alone. A task whose pause is still winding down goes back to
    /// `Pending` instead of `Paused` once its executor stops.
    ///
    /// # Errors
    ///
    /// - [`QueueError::NotResumable`] for a permanently failed task
    /// - [`QueueError::InvalidState`] for completed or cancelled tasks, and for
    ///   an active task with a cancel in flight
    /// - [`QueueError::Store`] if the task does not exist or the update fails
    #[instrument(skip(self), fields(direction = %self.inner.direction))]
    pub async fn resume(&self, id: TaskId) -> Result<()> {
        let inner = &self.inner;
        loop {
            let scheduler = inner.scheduler.lock().await;
            let task = inner.require(id).await?;

            match task.status() {
                TaskStatus::Pending => return Ok(()),
                TaskStatus::Active => {
                    let revocation = inner.active.get(&id).map(|active| active.revoke_pause());
                    match revocation {
                        None | Some(Revocation::NotPausing(None | Some(Interrupt::Requeue))) => {
                            return Ok(());
                        }
                        Some(Revocation::NotPausing(Some(_))) => {
                            return Err(QueueError::invalid_state(id, TaskStatus::Active, "resume"));
                        }
                        Some(Revocation::Revoked) => {
                            inner.store.reset_retry_count(id).await?;
                            info!(task_id = id, "pause revoked, task will requeue");
                            return Ok(());
                        }
                        Some(Revocation::Settled) => {}
                    }
                }
                TaskStatus::Failed if !task.resumable => return Err(QueueError::NotResumable(id)),
                TaskStatus::Paused | TaskStatus::Failed => {
                    drop(scheduler);
                    return inner.requeue(&task).await;
                }
                status => return Err(QueueError::invalid_state(id, status, "resume")),
            }

            drop(scheduler);
            inner.wait_for_exit(id).await;
        }
    }

    /// Runs a finished task again.
    ///
    /// A resumable failure is resumed in place (same id, partial data kept).
    /// A permanent failure or a cancelled task is recreated as a new task
    /// starting from zero; any partial download is deleted first. Returns
    /// the id of the task that will run.
    ///
    /// # Errors
    ///
    /// - [`QueueError::InvalidState`] for pending, active, paused or completed tasks
    /// - [`QueueError::Stopped`] after [`QueueManager::stop`]
    /// - [`QueueError::Store`] if the task does not exist or a write fails
    #[instrument(skip(self), fields(direction = %self.inner.direction))]
    pub async fn retry(&self, id: TaskId) -> Result<TaskId> {
        let inner = &self.inner;
        let task = inner.require(id).await?;

        match task.status() {
            TaskStatus::Failed if task.resumable => {
                inner.requeue(&task).await?;
                Ok(id)
            }
            TaskStatus::Failed | TaskStatus::Cancelled => {
                if let Some(open) = inner
                    .store
                    .find_open_by_remote_path(inner.direction, &task.remote_path)
                    .await?
                {
                    debug!(task_id = open.id, "newer task already open for path");
                    return Ok(open.id);
                }
                inner.discard_partial(&task).await;
                let new_id = self.enqueue(NewTask::from_task(&task)).await?;
                info!(old_task_id = id, task_id = new_id, "task recreated");
                Ok(new_id)
            }
            status => Err(QueueError::invalid_state(id, status, "retry")),
        }
    }

    /// Cancels a task.
    ///
    /// Pending and paused tasks are cancelled at once. An active task is
    /// interrupted and becomes `Cancelled` when its executor stops. Downloads
    /// lose their partial local file. Uploads keep the local file, and a
    /// remote ingestion task that was already accepted keeps running.
    ///
    /// # Errors
    ///
    /// - [`QueueError::InvalidState`] for completed or failed tasks
    /// - [`QueueError::Store`] if the task does not exist or the update fails
    #[instrument(skip(self), fields(direction = %self.inner.direction))]
    pub async fn cancel(&self, id: TaskId) -> Result<()> {
        let inner = &self.inner;
        loop {
            let mut scheduler = inner.scheduler.lock().await;
            let task = inner.require(id).await?;

            match task.status() {
                TaskStatus::Cancelled => return Ok(()),
                TaskStatus::Active => {
                    // Cancel outranks a pause or requeue already in flight.
                    if inner.interrupt_active(&task, Interrupt::Cancel, "cancel")?
                        == Signal::Delivered
                    {
                        return Ok(());
                    }
                }
                TaskStatus::Pending | TaskStatus::Paused => {
                    inner.store.update_status(id, TaskStatus::Cancelled).await?;
                    scheduler.queued.remove(&task.remote_path);
                    scheduler.backoff.remove(&task.remote_path);
                    drop(scheduler);
                    inner.discard_partial(&task).await;
                    inner.stats.increment_cancelled();
                    info!(task_id = id, "task cancelled");
                    inner.emit(id, TransferEventKind::Cancelled);
                    return Ok(());
                }
                status => return Err(QueueError::invalid_state(id, status, "cancel")),
            }

            drop(scheduler);
            inner.wait_for_exit(id).await;
        }
    }

    /// All tasks of this direction grouped by status.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Store`] if the query fails.
    pub async fn list_state(&self) -> Result<QueueSnapshot> {
        let tasks = self
            .inner
            .store
            .list(TaskFilter {
                direction: Some(self.inner.direction),
                ..TaskFilter::default()
            })
            .await?;
        Ok(QueueSnapshot::from_tasks(tasks))
    }

    /// Deletes completed task records. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Store`] if the delete fails.
    #[instrument(skip(self), fields(direction = %self.inner.direction))]
    pub async fn clear_completed(&self) -> Result<u64> {
        let removed = self
            .inner
            .store
            .clear_by_status(self.inner.direction, TaskStatus::Completed)
            .await?;
        info!(removed, "cleared completed tasks");
        Ok(removed)
    }

    /// Deletes failed and cancelled task records. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Store`] if the delete fails.
    #[instrument(skip(self), fields(direction = %self.inner.direction))]
    pub async fn clear_failed(&self) -> Result<u64> {
        let store = &self.inner.store;
        let direction = self.inner.direction;
        let failed = store.clear_by_status(direction, TaskStatus::Failed).await?;
        let cancelled = store
            .clear_by_status(direction, TaskStatus::Cancelled)
            .await?;
        info!(failed, cancelled, "cleared failed and cancelled tasks");
        Ok(failed + cancelled)
    }

    /// Subscribes to lifecycle and progress events.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        self.inner.events.subscribe()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> QueueStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Number of tasks currently executing.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.active.len()
    }

    /// True when nothing is running and nothing is waiting for admission.
    ///
    /// Tasks in retry backoff or held back by the debounce window count as
    /// waiting. Paused tasks do not.
    pub async fn is_idle(&self) -> bool {
        if !self.inner.active.is_empty() {
            return false;
        }
        let scheduler = self.inner.scheduler.lock().await;
        self.inner.active.is_empty() && scheduler.queued.is_empty()
    }

    /// Resolves once [`QueueManager::is_idle`] holds.
    pub async fn wait_until_idle(&self) {
        while !self.is_idle().await {
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
        }
    }

    /// Interrupts running transfers and waits for them to wind down.
    ///
    /// Interrupted tasks go back to `Pending`, so the next process resumes
    /// them. A stopped manager cannot be started again.
    #[instrument(skip(self), fields(direction = %self.inner.direction))]
    pub async fn stop(&self) {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return;
        }

        {
            let _scheduler = inner.scheduler.lock().await;
            inner.running.store(false, Ordering::SeqCst);
            for entry in &inner.active {
                entry.value().interrupt(Interrupt::Requeue);
            }
        }
        inner.shutdown.cancel();
        inner.tracker.close();
        inner.tracker.wait().await;
        info!("queue stopped");
    }
}

impl Inner {
    fn ensure_not_stopped(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            Err(QueueError::Stopped {
                direction: self.direction,
            })
        } else {
            Ok(())
        }
    }

    fn ensure_direction(&self, actual: Direction) -> Result<()> {
        if actual == self.direction {
            Ok(())
        } else {
            Err(QueueError::WrongDirection {
                expected: self.direction,
                actual,
            })
        }
    }

    async fn require(&self, id: TaskId) -> Result<TransferTask> {
        let task = self
            .store
            .get(id)
            .await?
            .ok_or(StoreError::TaskNotFound(id))?;
        self.ensure_direction(task.direction())?;
        Ok(task)
    }

    fn emit(&self, task_id: TaskId, kind: TransferEventKind) {
        // No subscribers is not an error.
        let _ = self
            .events
            .send(TransferEvent::new(task_id, self.direction, kind));
    }

    /// Signals a running executor. Caller holds the scheduler lock.
    fn interrupt_active(
        &self,
        task: &TransferTask,
        reason: Interrupt,
        action: &'static str,
    ) -> Result<Signal> {
        let Some(active) = self.active.get(&task.id) else {
            // Active in the store but not here: another process owns it.
            return Err(QueueError::invalid_state(task.id, TaskStatus::Active, action));
        };
        let signal = active.interrupt(reason);
        debug!(task_id = task.id, ?reason, ?signal, "interrupting active task");
        Ok(signal)
    }

    /// Waits until `id` has left the active set.
    async fn wait_for_exit(&self, id: TaskId) {
        while self.active.contains_key(&id) {
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
        }
    }

    /// Drops a finished task from the active set and frees its local path.
    fn retire(&self, task: &TransferTask) {
        self.active.remove(&task.id);
        self.claims.release(&task.local_path, task.id);
    }

    /// Re-runs admission whenever any manager sharing the registry frees a
    /// local path.
    fn watch_path_releases(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        let mut releases = self.claims.watch_releases();
        self.tracker.spawn(async move {
            loop {
                tokio::select! {
                    () = inner.shutdown.cancelled() => break,
                    changed = releases.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        inner.admit_logged().await;
                    }
                }
            }
        });
    }

    /// Repeats a lifecycle write until it lands.
    ///
    /// Transient store failures are retried with backoff while the manager
    /// runs; the task keeps its active slot meanwhile. Returns false if the
    /// write failed permanently or the manager stopped first, leaving the row
    /// for crash recovery.
    async fn persist<F, Fut>(&self, task_id: TaskId, what: &'static str, mut write: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<(), StoreError>>,
    {
        let mut delay = LIFECYCLE_RETRY_BASE;
        loop {
            match write().await {
                Ok(()) => return true,
                Err(e) if !e.is_transient() => {
                    error!(task_id, what, error = %e, "lifecycle write failed permanently");
                    return false;
                }
                Err(e) => warn!(
                    task_id,
                    what,
                    error = %e,
                    retry_in_ms = delay.as_millis(),
                    "lifecycle write failed, retrying"
                ),
            }
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    error!(task_id, what, "queue stopping, leaving task for recovery");
                    return false;
                }
                () = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 2).min(LIFECYCLE_RETRY_MAX);
        }
    }

    /// Moves a paused or resumable failed task back to `Pending` and admits.
    async fn requeue(self: &Arc<Self>, task: &TransferTask) -> Result<()> {
        self.ensure_not_stopped()?;
        {
            let mut scheduler = self.scheduler.lock().await;
            self.store.update_status(task.id, TaskStatus::Pending).await?;
            self.store.reset_retry_count(task.id).await?;
            scheduler.queued.insert(task.remote_path.clone());
        }
        info!(task_id = task.id, from = %task.status(), "task requeued");
        self.emit(task.id, TransferEventKind::Queued);
        self.admit_logged().await;
        Ok(())
    }

    /// Deletes a download's partial local file. Uploads are left untouched.
    async fn discard_partial(&self, task: &TransferTask) {
        if self.direction != Direction::Download {
            return;
        }
        match tokio::fs::remove_file(task.local_path()).await {
            Ok(()) => debug!(task_id = task.id, path = %task.local_path, "removed partial file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                task_id = task.id,
                path = %task.local_path,
                error = %e,
                "failed to remove partial file"
            ),
        }
    }

    async fn admit_logged(self: &Arc<Self>) {
        if let Err(e) = self.admit().await {
            warn!(direction = %self.direction, error = %e, "admission scan failed");
        }
    }

    /// Admission scan: promotes pending tasks into free slots.
    async fn admit(self: &Arc<Self>) -> Result<usize> {
        let mut scheduler = self.scheduler.lock().await;
        if !self.running.load(Ordering::SeqCst) || scheduler.queued.is_empty() {
            return Ok(0);
        }

        let now = Instant::now();
        scheduler.backoff.retain(|_, until| *until > now);

        let free = self.concurrency.saturating_sub(self.active.len());
        if free == 0 {
            return Ok(0);
        }

        let paths: Vec<String> = scheduler.queued.iter().cloned().collect();
        let resolved = self
            .store
            .batch_lookup_by_remote_path(&paths, self.direction)
            .await?;
        scheduler.queued.retain(|path| {
            resolved
                .get(path)
                .is_some_and(|task| task.status() == TaskStatus::Pending)
        });

        let mut candidates: Vec<TransferTask> = resolved
            .into_values()
            .filter(|task| {
                task.status() == TaskStatus::Pending
                    && !self.active.contains_key(&task.id)
                    && self.claims.holder(&task.local_path).is_none()
                    && !scheduler.backoff.contains_key(&task.remote_path)
                    && !self.debounce.contains(&task.remote_path)
            })
            .collect();
        candidates.sort_by_key(|task| (task.priority, task.id));

        let mut admitted = 0;
        for task in candidates {
            if admitted == free {
                break;
            }
            if !self.claims.try_claim(&task.local_path, task.id) {
                debug!(task_id = task.id, path = %task.local_path, "local path busy, waiting");
                continue;
            }
            if let Err(e) = self.store.update_status(task.id, TaskStatus::Active).await {
                self.claims.withdraw(&task.local_path, task.id);
                if e.is_conflict() {
                    debug!(task_id = task.id, error = %e, "task changed before admission, skipping");
                    continue;
                }
                return Err(e.into());
            }
            scheduler.queued.remove(&task.remote_path);
            self.launch(task);
            admitted += 1;
        }

        if admitted > 0 {
            debug!(
                admitted,
                active = self.active.len(),
                waiting = scheduler.queued.len(),
                "admission scan"
            );
        }
        Ok(admitted)
    }

    /// Registers a task as active and spawns its executor.
    fn launch(self: &Arc<Self>, task: TransferTask) {
        let active = Arc::new(ActiveTask::new());
        self.active.insert(task.id, Arc::clone(&active));
        self.emit(task.id, TransferEventKind::Started);
        debug!(task_id = task.id, remote_path = %task.remote_path, "task started");

        self.tracker.spawn(Arc::clone(self).run_task(task, active));
    }

    /// Executes one task and records its outcome. Boxed because admission spawns it.
    fn run_task(
        self: Arc<Self>,
        task: TransferTask,
        active: Arc<ActiveTask>,
    ) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let reporter = ProgressReporter::new(
                task.id,
                self.direction,
                task.transferred_bytes(),
                Arc::clone(&self.store),
                self.events.clone(),
            );
            let ctx = TransferContext {
                cancel: active.cancel.clone(),
                reporter: reporter.clone(),
            };

            let result = self.executor.execute(&task, &ctx).await;
            let reason = active.settle();
            // Progress lands before the final status so it cannot overwrite it.
            reporter.flush().await;
            self.stats
                .add_dropped_progress_writes(reporter.dropped_writes());

            match (result, reason) {
                (Ok(outcome), _) => self.on_completed(&task, outcome).await,
                (Err(_), Some(reason)) => self.on_interrupted(&task, reason).await,
                (Err(error), None) => self.on_failed(&task, &error, &reporter).await,
            }
        })
    }

    async fn on_completed(self: &Arc<Self>, task: &TransferTask, outcome: TransferOutcome) {
        let store = &self.store;
        self.persist(task.id, "completion", move || {
            store.update_status(task.id, TaskStatus::Completed)
        })
        .await;
        self.debounce.record(&task.remote_path);
        self.stats.increment_completed();
        self.retire(task);
        info!(
            task_id = task.id,
            bytes = outcome.transferred,
            skipped = outcome.skipped,
            "transfer completed"
        );
        self.emit(task.id, TransferEventKind::Completed);

        self.schedule_admission(self.debounce.window());
        self.admit_logged().await;
    }

    async fn on_interrupted(self: &Arc<Self>, task: &TransferTask, reason: Interrupt) {
        let (status, kind) = match reason {
            Interrupt::Cancel => (TaskStatus::Cancelled, Some(TransferEventKind::Cancelled)),
            Interrupt::Pause => (TaskStatus::Paused, Some(TransferEventKind::Paused)),
            // Stopping managers requeue silently.
            Interrupt::Requeue => (
                TaskStatus::Pending,
                self.running
                    .load(Ordering::SeqCst)
                    .then_some(TransferEventKind::Queued),
            ),
        };
        let store = &self.store;
        self.persist(task.id, "interruption", move || store.update_status(task.id, status))
            .await;
        if reason == Interrupt::Cancel {
            self.discard_partial(task).await;
            self.stats.increment_cancelled();
        }
        if reason == Interrupt::Requeue {
            self.scheduler
                .lock()
                .await
                .queued
                .insert(task.remote_path.clone());
        }
        self.retire(task);
        info!(task_id = task.id, %status, "transfer interrupted");
        if let Some(kind) = kind {
            self.emit(task.id, kind);
        }
        self.admit_logged().await;
    }

    async fn on_failed(
        self: &Arc<Self>,
        task: &TransferTask,
        error: &TransferError,
        reporter: &ProgressReporter,
    ) {
        let retry_count = u32::try_from(task.retry_count).unwrap_or(u32::MAX);
        match self.retry_policy.decide(error, retry_count) {
            RetryDecision::Retry { delay, retry_count } => {
                let message = error.to_string();
                let store = &self.store;
                let last_error = message.as_str();
                self.persist(task.id, "retry", move || {
                    store.schedule_retry(task.id, i64::from(retry_count), last_error)
                })
                .await;
                {
                    let mut scheduler = self.scheduler.lock().await;
                    scheduler
                        .backoff
                        .insert(task.remote_path.clone(), Instant::now() + delay);
                    scheduler.queued.insert(task.remote_path.clone());
                }
                self.stats.increment_retried();
                self.retire(task);
                warn!(
                    task_id = task.id,
                    retry_count,
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "transfer failed, will retry"
                );
                self.emit(
                    task.id,
                    TransferEventKind::Retrying {
                        retry_count,
                        delay,
                        error: message,
                    },
                );
                self.schedule_admission(delay);
            }
            RetryDecision::Fail { resumable, reason } => {
                let kind = error.kind();
                let transferred = i64::try_from(reporter.last_transferred()).unwrap_or(i64::MAX);
                let store = &self.store;
                let (message, label) = (reason.as_str(), kind.as_str());
                self.persist(task.id, "failure", move || {
                    store.mark_failed_as(task.id, message, Some(label), transferred, resumable)
                })
                .await;
                self.stats.increment_failed();
                self.retire(task);
                warn!(task_id = task.id, %kind, resumable, error = %reason, "transfer failed");
                self.emit(
                    task.id,
                    TransferEventKind::Failed {
                        failure: kind,
                        message: reason,
                        resumable,
                    },
                );
            }
            RetryDecision::Stop => {
                // Cancelled without an interrupt from this manager.
                self.on_interrupted(task, Interrupt::Requeue).await;
                return;
            }
        }
        self.admit_logged().await;
    }

    /// Runs an admission scan after `delay` unless the manager stops first.
    fn schedule_admission(self: &Arc<Self>, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        let inner = Arc::clone(self);
        self.tracker.spawn(async move {
            tokio::select! {
                () = inner.shutdown.cancelled() => {}
                () = tokio::time::sleep(delay) => inner.admit_logged().await,
            }
        });
    }
}
