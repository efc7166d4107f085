//! Queue manager integration tests with scripted executors.
//!
//! The executors here stand in for the HTTP ones so scheduling, retry,
//! interruption and recovery can be driven deterministically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use transferq_core::events::{self, EventReceiver};
use transferq_core::task::{Result as StoreResult, StoreDbErrorKind};
use transferq_core::transfer::{TransferContext, TransferOutcome};
use transferq_core::{
    Database, Direction, NewTask, PathClaims, QueueConfig, QueueError, QueueManager, RetryPolicy,
    StoreError, TaskFilter, TaskId, TaskRepository, TaskStatus, TaskStore, TransferError,
    TransferEventKind, TransferExecutor, TransferQueues, TransferTask,
};

mod support;
use support::file_store;

const WAIT: Duration = Duration::from_secs(10);

fn queue_config(concurrency: usize) -> QueueConfig {
    QueueConfig {
        concurrency,
        debounce_window: Duration::ZERO,
        retry_policy: RetryPolicy::new(3, Duration::from_millis(40), Duration::from_secs(1), 2.0),
    }
}

fn manager_with(
    direction: Direction,
    store: Arc<dyn TaskRepository>,
    executor: Arc<dyn TransferExecutor>,
    config: QueueConfig,
) -> QueueManager {
    QueueManager::new(direction, store, executor, config, events::channel()).expect("manager")
}

async fn wait_idle(manager: &QueueManager) {
    tokio::time::timeout(WAIT, manager.wait_until_idle())
        .await
        .expect("queue should drain");
}

/// Waits for the first event matching `predicate` on `task_id`.
async fn wait_for_event(
    rx: &mut EventReceiver,
    task_id: TaskId,
    predicate: impl Fn(&TransferEventKind) -> bool,
) -> TransferEventKind {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = rx.recv().await.expect("event channel open");
            if event.task_id == task_id && predicate(&event.kind) {
                return event.kind;
            }
        }
    })
    .await
    .expect("expected event")
}

async fn status_of(store: &TaskStore, id: TaskId) -> TaskStatus {
    store.require(id).await.expect("task").status()
}

fn ok(transferred: u64) -> Result<TransferOutcome, TransferError> {
    Ok(TransferOutcome {
        transferred,
        skipped: false,
    })
}

/// Sleeps briefly and tracks how many executions overlap.
#[derive(Default)]
struct CountingExecutor {
    running: AtomicUsize,
    peak: AtomicUsize,
    started_at: Mutex<HashMap<TaskId, Instant>>,
    delay: Duration,
}

impl CountingExecutor {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn started_at(&self, id: TaskId) -> Option<Instant> {
        self.started_at.lock().expect("lock").get(&id).copied()
    }
}

#[async_trait]
impl TransferExecutor for CountingExecutor {
    async fn execute(
        &self,
        task: &TransferTask,
        ctx: &TransferContext,
    ) -> Result<TransferOutcome, TransferError> {
        self.started_at
            .lock()
            .expect("lock")
            .insert(task.id, Instant::now());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        ctx.reporter.finish(100);
        ok(100)
    }
}

/// Fails each task with a 503 `failures` times, then succeeds.
struct FlakyExecutor {
    failures: usize,
    attempts: Mutex<HashMap<TaskId, Vec<Instant>>>,
}

impl FlakyExecutor {
    fn new(failures: usize) -> Self {
        Self {
            failures,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    fn attempts(&self, id: TaskId) -> Vec<Instant> {
        self.attempts
            .lock()
            .expect("lock")
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl TransferExecutor for FlakyExecutor {
    async fn execute(
        &self,
        task: &TransferTask,
        _ctx: &TransferContext,
    ) -> Result<TransferOutcome, TransferError> {
        let attempt = {
            let mut attempts = self.attempts.lock().expect("lock");
            let entry = attempts.entry(task.id).or_default();
            entry.push(Instant::now());
            entry.len()
        };
        if attempt <= self.failures {
            return Err(TransferError::http_status(&task.remote_path, 503));
        }
        ok(1)
    }
}

/// Fails every attempt with the error produced by `make`.
struct FailingExecutor<F>(F);

#[async_trait]
impl<F> TransferExecutor for FailingExecutor<F>
where
    F: Fn(&TransferTask) -> TransferError + Send + Sync,
{
    async fn execute(
        &self,
        task: &TransferTask,
        ctx: &TransferContext,
    ) -> Result<TransferOutcome, TransferError> {
        ctx.reporter.report(25, Some(100));
        Err((self.0)(task))
    }
}

/// Writes part of the file, reports progress, then blocks until interrupted.
/// With `block_once`, only the first attempt per task blocks.
#[derive(Default)]
struct BlockingExecutor {
    block_once: bool,
    attempts: Mutex<HashMap<TaskId, usize>>,
}

#[async_trait]
impl TransferExecutor for BlockingExecutor {
    async fn execute(
        &self,
        task: &TransferTask,
        ctx: &TransferContext,
    ) -> Result<TransferOutcome, TransferError> {
        let attempt = {
            let mut attempts = self.attempts.lock().expect("lock");
            let n = attempts.entry(task.id).or_default();
            *n += 1;
            *n
        };
        if self.block_once && attempt > 1 {
            ctx.reporter.finish(100);
            return ok(100);
        }

        if task.direction() == Direction::Download {
            tokio::fs::write(task.local_path(), vec![0u8; 40])
                .await
                .map_err(|e| TransferError::local_io(task.local_path(), e))?;
        }
        ctx.reporter.report(40, Some(100));
        ctx.cancel.cancelled().await;
        Err(TransferError::Cancelled)
    }
}

/// Like `BlockingExecutor`, but takes a while to wind down once interrupted.
/// Only the first attempt per task blocks; later ones complete at once.
#[derive(Default)]
struct SlowUnwindExecutor {
    attempts: Mutex<HashMap<TaskId, usize>>,
}

#[async_trait]
impl TransferExecutor for SlowUnwindExecutor {
    async fn execute(
        &self,
        task: &TransferTask,
        ctx: &TransferContext,
    ) -> Result<TransferOutcome, TransferError> {
        let attempt = {
            let mut attempts = self.attempts.lock().expect("lock");
            let n = attempts.entry(task.id).or_default();
            *n += 1;
            *n
        };
        if attempt > 1 {
            ctx.reporter.finish(100);
            return ok(100);
        }

        if task.direction() == Direction::Download {
            tokio::fs::write(task.local_path(), vec![0u8; 40])
                .await
                .map_err(|e| TransferError::local_io(task.local_path(), e))?;
        }
        ctx.reporter.report(40, Some(100));
        ctx.cancel.cancelled().await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        Err(TransferError::Cancelled)
    }
}

/// Shared by several managers; records how many tasks use each local path at once.
#[derive(Default)]
struct PathOverlapExecutor {
    in_use: Mutex<HashMap<String, usize>>,
    peak: AtomicUsize,
}

#[async_trait]
impl TransferExecutor for PathOverlapExecutor {
    async fn execute(
        &self,
        task: &TransferTask,
        ctx: &TransferContext,
    ) -> Result<TransferOutcome, TransferError> {
        {
            let mut in_use = self.in_use.lock().expect("lock");
            let count = in_use.entry(task.local_path.clone()).or_default();
            *count += 1;
            self.peak.fetch_max(*count, Ordering::SeqCst);
        }
        tokio::time::sleep(Duration::from_millis(80)).await;
        {
            let mut in_use = self.in_use.lock().expect("lock");
            if let Some(count) = in_use.get_mut(&task.local_path) {
                *count -= 1;
            }
        }
        ctx.reporter.finish(100);
        ok(100)
    }
}

/// Delegates to a real store, optionally refusing every progress write and
/// failing the first few writes of one status with a busy database.
#[derive(Default)]
struct ScriptedStore {
    inner: Option<TaskStore>,
    refuse_progress: bool,
    busy_status: Option<TaskStatus>,
    busy_failures: AtomicUsize,
}

impl ScriptedStore {
    fn over(inner: TaskStore) -> Self {
        Self {
            inner: Some(inner),
            ..Self::default()
        }
    }

    fn inner(&self) -> &TaskStore {
        self.inner.as_ref().expect("inner store")
    }
}

#[async_trait]
impl TaskRepository for ScriptedStore {
    async fn create(&self, task: &NewTask) -> StoreResult<TaskId> {
        self.inner().create(task).await
    }

    async fn get(&self, id: TaskId) -> StoreResult<Option<TransferTask>> {
        self.inner().get(id).await
    }

    async fn update_status(&self, id: TaskId, to: TaskStatus) -> StoreResult<()> {
        if self.busy_status == Some(to)
            && self
                .busy_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(StoreError::Database {
                kind: StoreDbErrorKind::BusyOrLocked,
                message: "database is locked".to_string(),
            });
        }
        self.inner().update_status(id, to).await
    }

    async fn update_progress(
        &self,
        id: TaskId,
        transferred_size: i64,
        file_size: Option<i64>,
    ) -> StoreResult<()> {
        if self.refuse_progress {
            return Err(StoreError::TaskNotFound(id));
        }
        self.inner()
            .update_progress(id, transferred_size, file_size)
            .await
    }

    async fn mark_failed_as(
        &self,
        id: TaskId,
        message: &str,
        kind: Option<&str>,
        transferred_size: i64,
        resumable: bool,
    ) -> StoreResult<()> {
        self.inner()
            .mark_failed_as(id, message, kind, transferred_size, resumable)
            .await
    }

    async fn schedule_retry(&self, id: TaskId, retry_count: i64, last_error: &str) -> StoreResult<()> {
        self.inner().schedule_retry(id, retry_count, last_error).await
    }

    async fn reset_retry_count(&self, id: TaskId) -> StoreResult<()> {
        self.inner().reset_retry_count(id).await
    }

    async fn batch_lookup_by_remote_path(
        &self,
        remote_paths: &[String],
        direction: Direction,
    ) -> StoreResult<HashMap<String, TransferTask>> {
        self.inner()
            .batch_lookup_by_remote_path(remote_paths, direction)
            .await
    }

    async fn find_open_by_remote_path(
        &self,
        direction: Direction,
        remote_path: &str,
    ) -> StoreResult<Option<TransferTask>> {
        self.inner()
            .find_open_by_remote_path(direction, remote_path)
            .await
    }

    async fn list(&self, filter: TaskFilter<'_>) -> StoreResult<Vec<TransferTask>> {
        self.inner().list(filter).await
    }

    async fn reset_active(&self, direction: Direction) -> StoreResult<u64> {
        self.inner().reset_active(direction).await
    }

    async fn clear_by_status(&self, direction: Direction, status: TaskStatus) -> StoreResult<u64> {
        self.inner().clear_by_status(direction, status).await
    }
}

#[tokio::test]
async fn test_concurrency_cap_and_priority_order() {
    let (store, _temp) = file_store().await;
    let executor = Arc::new(CountingExecutor::with_delay(Duration::from_millis(30)));
    let manager = manager_with(
        Direction::Download,
        Arc::new(store.clone()),
        executor.clone(),
        queue_config(2),
    );
    let mut rx = manager.subscribe();

    let mut expected = Vec::new();
    for (name, priority) in [("e", 5), ("a", 1), ("f", 9), ("b", 2), ("d", 4), ("c", 3)] {
        let id = manager
            .enqueue(
                NewTask::download(format!("/objects/{name}"), format!("/tmp/tq-{name}"))
                    .with_priority(priority),
            )
            .await
            .expect("enqueue");
        expected.push((priority, id));
    }
    expected.sort_unstable();
    let expected: Vec<TaskId> = expected.into_iter().map(|(_, id)| id).collect();

    manager.start().await.expect("start");
    wait_idle(&manager).await;

    let started: Vec<TaskId> = support::drain(&mut rx)
        .into_iter()
        .filter(|event| matches!(event.kind, TransferEventKind::Started))
        .map(|event| event.task_id)
        .collect();
    assert_eq!(started, expected, "admission must follow priority order");
    assert!(executor.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(manager.stats().completed, 6);

    let snapshot = manager.list_state().await.expect("state");
    assert_eq!(snapshot.completed.len(), 6);
    manager.stop().await;
}

#[tokio::test]
async fn test_transient_failures_retry_with_backoff() {
    let (store, _temp) = file_store().await;
    let executor = Arc::new(FlakyExecutor::new(2));
    let manager = manager_with(
        Direction::Upload,
        Arc::new(store.clone()),
        executor.clone(),
        queue_config(1),
    );
    let mut rx = manager.subscribe();
    manager.start().await.expect("start");

    let id = manager
        .enqueue(NewTask::upload("/tmp/report.csv", "/reports/report.csv"))
        .await
        .expect("enqueue");
    wait_for_event(&mut rx, id, |kind| matches!(kind, TransferEventKind::Completed)).await;

    let attempts = executor.attempts(id);
    assert_eq!(attempts.len(), 3);
    assert!(attempts[1] - attempts[0] >= Duration::from_millis(35));
    assert!(attempts[2] - attempts[1] >= Duration::from_millis(75));

    let task = store.require(id).await.expect("task");
    assert_eq!(task.status(), TaskStatus::Completed);
    assert_eq!(task.retry_count, 2);
    assert!(task.error_message.is_none());
    assert_eq!(manager.stats().retried, 2);
    manager.stop().await;
}

#[tokio::test]
async fn test_exhausted_retries_fail_resumable_then_resume() {
    let (store, _temp) = file_store().await;
    let executor = Arc::new(FlakyExecutor::new(2));
    let mut config = queue_config(1);
    config.retry_policy = RetryPolicy::new(1, Duration::from_millis(10), Duration::from_secs(1), 2.0);
    let manager = manager_with(
        Direction::Download,
        Arc::new(store.clone()),
        executor.clone(),
        config,
    );
    let mut rx = manager.subscribe();
    manager.start().await.expect("start");

    let id = manager
        .enqueue(NewTask::download("/flaky.bin", "/tmp/tq-flaky.bin"))
        .await
        .expect("enqueue");
    let failed = wait_for_event(&mut rx, id, |kind| {
        matches!(kind, TransferEventKind::Failed { .. })
    })
    .await;
    let TransferEventKind::Failed { resumable, .. } = failed else {
        unreachable!()
    };
    assert!(resumable);

    let task = store.require(id).await.expect("task");
    assert_eq!(task.status(), TaskStatus::Failed);
    assert_eq!(task.error_kind.as_deref(), Some("network"));
    assert!(
        task.error_message
            .as_deref()
            .is_some_and(|msg| msg.contains("503"))
    );

    manager.resume(id).await.expect("resume");
    wait_for_event(&mut rx, id, |kind| matches!(kind, TransferEventKind::Completed)).await;
    assert_eq!(executor.attempts(id).len(), 3);
    assert_eq!(status_of(&store, id).await, TaskStatus::Completed);
    manager.stop().await;
}

#[tokio::test]
async fn test_permanent_failure_retry_recreates_task() {
    let (store, temp) = file_store().await;
    let local = temp.path().join("missing.bin");
    let executor = Arc::new(FailingExecutor(|task: &TransferTask| {
        TransferError::http_status(&task.remote_path, 404)
    }));
    let manager = manager_with(
        Direction::Download,
        Arc::new(store.clone()),
        executor,
        queue_config(1),
    );
    let mut rx = manager.subscribe();
    manager.start().await.expect("start");

    let id = manager
        .enqueue(NewTask::download("/missing.bin", local.to_string_lossy()))
        .await
        .expect("enqueue");
    wait_for_event(&mut rx, id, |kind| {
        matches!(kind, TransferEventKind::Failed { resumable: false, .. })
    })
    .await;

    let failed = store.require(id).await.expect("task");
    assert!(!failed.resumable);
    assert_eq!(failed.transferred_size, 25);
    assert!(matches!(
        manager.resume(id).await,
        Err(QueueError::NotResumable(_))
    ));

    std::fs::write(&local, b"junk").expect("seed partial");
    let new_id = manager.retry(id).await.expect("retry");
    assert_ne!(new_id, id);
    assert!(!local.exists(), "recreating a download starts from zero");

    let recreated = store.require(new_id).await.expect("new task");
    assert_eq!(recreated.remote_path, "/missing.bin");
    assert_eq!(recreated.local_path, failed.local_path);
    assert_eq!(recreated.retry_count, 0);
    manager.stop().await;
}

#[tokio::test]
async fn test_completed_path_is_debounced() {
    let (store, _temp) = file_store().await;
    let executor = Arc::new(CountingExecutor::with_delay(Duration::ZERO));
    let mut config = queue_config(2);
    config.debounce_window = Duration::from_millis(300);
    let manager = manager_with(
        Direction::Download,
        Arc::new(store.clone()),
        executor.clone(),
        config,
    );
    let mut rx = manager.subscribe();
    manager.start().await.expect("start");

    let first = manager
        .enqueue(NewTask::download("/same.bin", "/tmp/tq-same.bin"))
        .await
        .expect("enqueue");
    wait_for_event(&mut rx, first, |kind| matches!(kind, TransferEventKind::Completed)).await;
    let completed_at = Instant::now();

    let second = manager
        .enqueue(NewTask::download("/same.bin", "/tmp/tq-same.bin"))
        .await
        .expect("enqueue again");
    assert_ne!(second, first);
    assert_eq!(status_of(&store, second).await, TaskStatus::Pending);

    wait_for_event(&mut rx, second, |kind| {
        matches!(kind, TransferEventKind::Completed)
    })
    .await;
    let started = executor.started_at(second).expect("second run");
    assert!(
        started - completed_at >= Duration::from_millis(250),
        "re-run started {:?} after completion",
        started - completed_at
    );
    manager.stop().await;
}

#[tokio::test]
async fn test_cancel_active_download_removes_partial_file() {
    let (store, temp) = file_store().await;
    let local = temp.path().join("partial.bin");
    let manager = manager_with(
        Direction::Download,
        Arc::new(store.clone()),
        Arc::new(BlockingExecutor::default()),
        queue_config(1),
    );
    let mut rx = manager.subscribe();
    manager.start().await.expect("start");

    let id = manager
        .enqueue(NewTask::download("/partial.bin", local.to_string_lossy()))
        .await
        .expect("enqueue");
    wait_for_event(&mut rx, id, |kind| matches!(kind, TransferEventKind::Progress(_))).await;
    assert!(local.exists());

    manager.cancel(id).await.expect("cancel");
    wait_for_event(&mut rx, id, |kind| matches!(kind, TransferEventKind::Cancelled)).await;

    assert_eq!(status_of(&store, id).await, TaskStatus::Cancelled);
    assert!(!local.exists());
    assert_eq!(manager.stats().cancelled, 1);
    manager.cancel(id).await.expect("cancelling twice is a no-op");
    manager.stop().await;
}

#[tokio::test]
async fn test_cancel_active_upload_keeps_local_file() {
    let (store, temp) = file_store().await;
    let local = temp.path().join("source.bin");
    std::fs::write(&local, b"source").expect("write source");
    let manager = manager_with(
        Direction::Upload,
        Arc::new(store.clone()),
        Arc::new(BlockingExecutor::default()),
        queue_config(1),
    );
    let mut rx = manager.subscribe();
    manager.start().await.expect("start");

    let id = manager
        .enqueue(NewTask::upload(local.to_string_lossy(), "/dest/source.bin"))
        .await
        .expect("enqueue");
    wait_for_event(&mut rx, id, |kind| matches!(kind, TransferEventKind::Progress(_))).await;

    manager.cancel(id).await.expect("cancel");
    wait_for_event(&mut rx, id, |kind| matches!(kind, TransferEventKind::Cancelled)).await;

    assert_eq!(std::fs::read(&local).expect("read"), b"source");
    manager.stop().await;
}

#[tokio::test]
async fn test_pause_and_resume_active_task_keeps_progress() {
    let (store, temp) = file_store().await;
    let local = temp.path().join("pausable.bin");
    let executor = Arc::new(BlockingExecutor {
        block_once: true,
        ..BlockingExecutor::default()
    });
    let manager = manager_with(
        Direction::Download,
        Arc::new(store.clone()),
        executor,
        queue_config(1),
    );
    let mut rx = manager.subscribe();
    manager.start().await.expect("start");

    let id = manager
        .enqueue(NewTask::download("/pausable.bin", local.to_string_lossy()))
        .await
        .expect("enqueue");
    wait_for_event(&mut rx, id, |kind| matches!(kind, TransferEventKind::Progress(_))).await;

    manager.pause(id).await.expect("pause");
    wait_for_event(&mut rx, id, |kind| matches!(kind, TransferEventKind::Paused)).await;

    let paused = store.require(id).await.expect("task");
    assert_eq!(paused.status(), TaskStatus::Paused);
    assert_eq!(paused.transferred_size, 40);
    assert!(local.exists(), "pausing keeps partial data");
    assert!(manager.is_idle().await, "paused tasks do not hold the queue");

    manager.resume(id).await.expect("resume");
    wait_for_event(&mut rx, id, |kind| matches!(kind, TransferEventKind::Completed)).await;
    assert_eq!(status_of(&store, id).await, TaskStatus::Completed);
    manager.stop().await;
}

#[tokio::test]
async fn test_restart_recovers_active_tasks() {
    let temp = tempfile::TempDir::new().expect("temp dir");
    let db_path = temp.path().join("tasks.db");

    let mut ids = Vec::new();
    {
        let store = TaskStore::new(Database::new(&db_path).await.expect("db"));
        for i in 0..3 {
            let id = store
                .create(&NewTask::download(format!("/r/{i}"), format!("/tmp/tq-r{i}")))
                .await
                .expect("create");
            store
                .update_status(id, TaskStatus::Active)
                .await
                .expect("activate");
            ids.push(id);
        }
        // Process "crashes" here with three tasks mid-flight.
    }

    let store = TaskStore::new(Database::new(&db_path).await.expect("reopen"));
    let manager = manager_with(
        Direction::Download,
        Arc::new(store.clone()),
        Arc::new(CountingExecutor::with_delay(Duration::from_millis(5))),
        queue_config(2),
    );
    assert_eq!(manager.start().await.expect("start"), 3);
    wait_idle(&manager).await;

    for id in ids {
        assert_eq!(status_of(&store, id).await, TaskStatus::Completed);
    }
    let stats = manager.stats();
    assert_eq!(stats.recovered, 3);
    assert_eq!(stats.completed, 3);
    manager.stop().await;
}

#[tokio::test]
async fn test_progress_write_failures_do_not_fail_transfer() {
    let (store, _temp) = file_store().await;
    let refusing = Arc::new(ScriptedStore {
        refuse_progress: true,
        ..ScriptedStore::over(store.clone())
    });
    let manager = manager_with(
        Direction::Upload,
        refusing,
        Arc::new(CountingExecutor::with_delay(Duration::ZERO)),
        queue_config(1),
    );
    let mut rx = manager.subscribe();
    manager.start().await.expect("start");

    let id = manager
        .enqueue(NewTask::upload("/tmp/a.txt", "/a.txt"))
        .await
        .expect("enqueue");
    wait_for_event(&mut rx, id, |kind| matches!(kind, TransferEventKind::Completed)).await;

    assert_eq!(status_of(&store, id).await, TaskStatus::Completed);
    assert!(manager.stats().dropped_progress_writes >= 1);
    manager.stop().await;
}

#[tokio::test]
async fn test_stop_parks_active_tasks_as_pending() {
    let (store, temp) = file_store().await;
    let local = |name: &str| temp.path().join(name).to_string_lossy().into_owned();
    let manager = manager_with(
        Direction::Download,
        Arc::new(store.clone()),
        Arc::new(BlockingExecutor::default()),
        queue_config(2),
    );
    let mut rx = manager.subscribe();
    manager.start().await.expect("start");

    let a = manager
        .enqueue(NewTask::download("/stop/a", local("a")))
        .await
        .expect("enqueue");
    let b = manager
        .enqueue(NewTask::download("/stop/b", local("b")))
        .await
        .expect("enqueue");
    wait_for_event(&mut rx, a, |kind| matches!(kind, TransferEventKind::Progress(_))).await;
    wait_for_event(&mut rx, b, |kind| matches!(kind, TransferEventKind::Progress(_))).await;

    tokio::time::timeout(WAIT, manager.stop())
        .await
        .expect("stop should finish");

    assert_eq!(status_of(&store, a).await, TaskStatus::Pending);
    assert_eq!(status_of(&store, b).await, TaskStatus::Pending);
    assert_eq!(manager.active_count(), 0);
    assert!(matches!(
        manager.enqueue(NewTask::download("/stop/c", local("c"))).await,
        Err(QueueError::Stopped { .. })
    ));
}

#[tokio::test]
async fn test_queues_route_by_direction_and_share_events() {
    let (store, _temp) = file_store().await;
    let store: Arc<dyn TaskRepository> = Arc::new(store);
    let events = events::channel();
    let claims = PathClaims::new();
    let uploads = QueueManager::with_path_claims(
        Direction::Upload,
        Arc::clone(&store),
        Arc::new(CountingExecutor::with_delay(Duration::ZERO)),
        queue_config(1),
        events.clone(),
        claims.clone(),
    )
    .expect("uploads");
    let downloads = QueueManager::with_path_claims(
        Direction::Download,
        Arc::clone(&store),
        Arc::new(CountingExecutor::with_delay(Duration::ZERO)),
        queue_config(1),
        events.clone(),
        claims,
    )
    .expect("downloads");
    let queues = TransferQueues::new(uploads, downloads, events).expect("queues");
    let mut rx = queues.subscribe();
    queues.start().await.expect("start");

    let up = queues
        .enqueue(NewTask::upload("/tmp/up.txt", "/up.txt"))
        .await
        .expect("upload");
    let down = queues
        .enqueue(NewTask::download("/down.txt", "/tmp/tq-down.txt"))
        .await
        .expect("download");
    tokio::time::timeout(WAIT, queues.wait_until_idle())
        .await
        .expect("idle");

    let completed: Vec<(TaskId, Direction)> = support::drain(&mut rx)
        .into_iter()
        .filter(|event| matches!(event.kind, TransferEventKind::Completed))
        .map(|event| (event.task_id, event.direction))
        .collect();
    assert!(completed.contains(&(up, Direction::Upload)));
    assert!(completed.contains(&(down, Direction::Download)));
    assert_eq!(queues.uploads().stats().completed, 1);
    assert_eq!(queues.downloads().stats().completed, 1);
    queues.stop().await;
}

#[tokio::test]
async fn test_cancel_overrides_pause_still_winding_down() {
    let (store, temp) = file_store().await;
    let local = temp.path().join("half.bin");
    let manager = manager_with(
        Direction::Download,
        Arc::new(store.clone()),
        Arc::new(SlowUnwindExecutor::default()),
        queue_config(1),
    );
    let mut rx = manager.subscribe();
    manager.start().await.expect("start");

    let id = manager
        .enqueue(NewTask::download("/half.bin", local.to_string_lossy()))
        .await
        .expect("enqueue");
    wait_for_event(&mut rx, id, |kind| matches!(kind, TransferEventKind::Progress(_))).await;

    manager.pause(id).await.expect("pause");
    manager.cancel(id).await.expect("cancel");
    assert!(matches!(
        manager.resume(id).await,
        Err(QueueError::InvalidState { .. })
    ));
    let outcome = wait_for_event(&mut rx, id, |kind| {
        matches!(kind, TransferEventKind::Cancelled | TransferEventKind::Paused)
    })
    .await;
    assert!(
        matches!(outcome, TransferEventKind::Cancelled),
        "cancel lost to pause: {outcome:?}"
    );
    wait_idle(&manager).await;

    assert_eq!(status_of(&store, id).await, TaskStatus::Cancelled);
    assert!(!local.exists(), "cancel removes the partial download");
    assert_eq!(manager.stats().cancelled, 1);
    manager.stop().await;
}

#[tokio::test]
async fn test_resume_during_pause_unwind_requeues_task() {
    let (store, temp) = file_store().await;
    let local = temp.path().join("resumed.bin");
    let manager = manager_with(
        Direction::Download,
        Arc::new(store.clone()),
        Arc::new(SlowUnwindExecutor::default()),
        queue_config(1),
    );
    let mut rx = manager.subscribe();
    manager.start().await.expect("start");

    let id = manager
        .enqueue(NewTask::download("/resumed.bin", local.to_string_lossy()))
        .await
        .expect("enqueue");
    wait_for_event(&mut rx, id, |kind| matches!(kind, TransferEventKind::Progress(_))).await;

    manager.pause(id).await.expect("pause");
    manager.resume(id).await.expect("resume");

    let outcome = wait_for_event(&mut rx, id, |kind| {
        matches!(kind, TransferEventKind::Completed | TransferEventKind::Paused)
    })
    .await;
    assert!(
        matches!(outcome, TransferEventKind::Completed),
        "resume was lost: {outcome:?}"
    );
    let task = store.require(id).await.expect("task");
    assert_eq!(task.status(), TaskStatus::Completed);
    assert_eq!(task.retry_count, 0);
    manager.stop().await;
}

#[tokio::test]
async fn test_local_path_is_exclusive_across_directions() {
    let (store, temp) = file_store().await;
    let store: Arc<dyn TaskRepository> = Arc::new(store);
    let shared = temp.path().join("shared.bin").to_string_lossy().into_owned();
    let executor = Arc::new(PathOverlapExecutor::default());
    let events = events::channel();
    let claims = PathClaims::new();
    let uploads = QueueManager::with_path_claims(
        Direction::Upload,
        Arc::clone(&store),
        executor.clone(),
        queue_config(2),
        events.clone(),
        claims.clone(),
    )
    .expect("uploads");
    let downloads = QueueManager::with_path_claims(
        Direction::Download,
        Arc::clone(&store),
        executor.clone(),
        queue_config(2),
        events.clone(),
        claims.clone(),
    )
    .expect("downloads");
    let queues = TransferQueues::new(uploads, downloads, events).expect("queues");
    let mut rx = queues.subscribe();
    queues.start().await.expect("start");

    let up = queues
        .enqueue(NewTask::upload(shared.clone(), "/outbox/shared.bin"))
        .await
        .expect("upload");
    let down = queues
        .enqueue(NewTask::download("/inbox/shared.bin", shared.clone()))
        .await
        .expect("download");
    wait_for_event(&mut rx, up, |kind| matches!(kind, TransferEventKind::Completed)).await;
    tokio::time::timeout(WAIT, queues.wait_until_idle())
        .await
        .expect("the waiting direction is woken when the path frees up");

    assert_eq!(executor.peak.load(Ordering::SeqCst), 1);
    assert_eq!(
        store.get(down).await.expect("get").expect("task").status(),
        TaskStatus::Completed
    );
    assert!(claims.is_empty());
    queues.stop().await;
}

#[tokio::test]
async fn test_transient_status_write_failure_is_retried() {
    let (store, _temp) = file_store().await;
    let flaky = Arc::new(ScriptedStore {
        busy_status: Some(TaskStatus::Completed),
        busy_failures: AtomicUsize::new(2),
        ..ScriptedStore::over(store.clone())
    });
    let manager = manager_with(
        Direction::Upload,
        flaky.clone(),
        Arc::new(CountingExecutor::with_delay(Duration::ZERO)),
        queue_config(1),
    );
    let mut rx = manager.subscribe();
    manager.start().await.expect("start");

    let id = manager
        .enqueue(NewTask::upload("/tmp/tq-busy.txt", "/busy.txt"))
        .await
        .expect("enqueue");
    wait_for_event(&mut rx, id, |kind| matches!(kind, TransferEventKind::Completed)).await;

    assert_eq!(status_of(&store, id).await, TaskStatus::Completed);
    assert_eq!(flaky.busy_failures.load(Ordering::SeqCst), 0);
    assert_eq!(manager.active_count(), 0);
    assert!(manager.is_idle().await);
    manager.stop().await;
}
