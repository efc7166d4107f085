//! Integration tests for the download executor against a mock object store.

use std::time::Duration;

use transferq_core::transfer::{ClientOptions, TransferExecutor};
use transferq_core::{
    Direction, DownloadExecutor, FailureKind, HttpClient, NewTask, TaskStatus, TaskStore,
    TransferError, TransferTask,
};
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;
use support::{file_store, transfer_context};

const MIB: usize = 1024 * 1024;

fn executor_for(base: &str) -> DownloadExecutor {
    let client = HttpClient::new(&ClientOptions::default()).expect("client");
    DownloadExecutor::new(client, Url::parse(base).expect("base url"))
}

/// Creates an active download task the way the queue would before running it.
async fn active_download(store: &TaskStore, task: NewTask) -> TransferTask {
    let id = store.create(&task).await.expect("create");
    store
        .update_status(id, TaskStatus::Active)
        .await
        .expect("activate");
    store.require(id).await.expect("reload")
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn test_download_fresh_file_writes_body_and_progress() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    let body = pattern(64 * 1024);
    Mock::given(method("GET"))
        .and(path("/reports/q3.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (store, temp_dir) = file_store().await;
    let local = temp_dir.path().join("out").join("q3.pdf");
    let task = active_download(
        &store,
        NewTask::download("reports/q3.pdf", local.to_string_lossy()),
    )
    .await;
    let (ctx, _events) = transfer_context(&store, task.id, Direction::Download, 0);

    let outcome = executor_for(&mock_server.uri())
        .execute(&task, &ctx)
        .await
        .expect("download should succeed");

    assert_eq!(outcome.transferred, body.len() as u64);
    assert!(!outcome.skipped);
    assert_eq!(std::fs::read(&local).expect("read local"), body);

    ctx.reporter.flush().await;
    let stored = store.require(task.id).await.expect("task");
    assert_eq!(stored.transferred_bytes(), body.len() as u64);
    assert_eq!(stored.expected_size(), Some(body.len() as u64));
}

#[tokio::test]
async fn test_download_resumes_with_range_request() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    let full = pattern(10 * MIB);
    let offset = 4 * MIB;

    Mock::given(method("GET"))
        .and(path("/big.bin"))
        .and(header("Range", "bytes=4194304-"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", "bytes 4194304-10485759/10485760")
                .insert_header("Accept-Ranges", "bytes")
                .set_body_bytes(full[offset..].to_vec()),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let (store, temp_dir) = file_store().await;
    let local = temp_dir.path().join("big.bin");
    std::fs::write(&local, &full[..offset]).expect("seed partial file");

    let task = active_download(
        &store,
        NewTask::download("big.bin", local.to_string_lossy()).with_file_size(full.len() as u64),
    )
    .await;
    store
        .update_progress(task.id, offset as i64, None)
        .await
        .expect("seed progress");
    let task = store.require(task.id).await.expect("reload");
    let (ctx, events) = transfer_context(&store, task.id, Direction::Download, offset as u64);
    let mut rx = events.subscribe();

    let outcome = executor_for(&mock_server.uri())
        .execute(&task, &ctx)
        .await
        .expect("resumed download should succeed");

    assert_eq!(outcome.transferred, full.len() as u64);
    let on_disk = std::fs::read(&local).expect("read local");
    assert_eq!(on_disk.len(), full.len());
    assert!(on_disk == full, "resumed file must equal the remote object");

    let progress: Vec<u64> = support::drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event.kind {
            transferq_core::TransferEventKind::Progress(snapshot) => Some(snapshot.transferred),
            _ => None,
        })
        .collect();
    assert!(!progress.is_empty());
    assert!(
        progress.iter().all(|bytes| *bytes > offset as u64),
        "progress should continue from the resume offset"
    );
    assert!(progress.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[tokio::test]
async fn test_download_truncated_partial_resumes_from_disk_length() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    let full = pattern(4096);
    let on_disk = 1000;

    // Asking for bytes past the end of the local file would be a bug.
    Mock::given(method("GET"))
        .and(path("/cut.bin"))
        .and(header("Range", "bytes=1000-"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", "bytes 1000-4095/4096")
                .insert_header("Accept-Ranges", "bytes")
                .set_body_bytes(full[on_disk..].to_vec()),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let (store, temp_dir) = file_store().await;
    let local = temp_dir.path().join("cut.bin");
    std::fs::write(&local, &full[..on_disk]).expect("seed truncated file");

    let task = active_download(
        &store,
        NewTask::download("cut.bin", local.to_string_lossy()).with_file_size(full.len() as u64),
    )
    .await;
    store
        .update_progress(task.id, 3000, None)
        .await
        .expect("seed progress ahead of disk");
    let task = store.require(task.id).await.expect("reload");
    let (ctx, _events) = transfer_context(&store, task.id, Direction::Download, 3000);

    let outcome = executor_for(&mock_server.uri())
        .execute(&task, &ctx)
        .await
        .expect("download should resume from the disk length");

    assert_eq!(outcome.transferred, full.len() as u64);
    assert!(std::fs::read(&local).expect("read local") == full);
}

#[tokio::test]
async fn test_download_complete_local_file_skips_network() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"unused".to_vec()))
        .expect(0)
        .mount(&mock_server)
        .await;

    let (store, temp_dir) = file_store().await;
    let local = temp_dir.path().join("done.bin");
    std::fs::write(&local, vec![7u8; 2048]).expect("seed file");

    let task = active_download(
        &store,
        NewTask::download("done.bin", local.to_string_lossy()).with_file_size(2048),
    )
    .await;
    let (ctx, _events) = transfer_context(&store, task.id, Direction::Download, 0);

    let outcome = executor_for(&mock_server.uri())
        .execute(&task, &ctx)
        .await
        .expect("skip should succeed");

    assert!(outcome.skipped);
    assert_eq!(outcome.transferred, 2048);
    ctx.reporter.flush().await;
    assert_eq!(
        store.require(task.id).await.expect("task").transferred_bytes(),
        2048
    );
}

#[tokio::test]
async fn test_download_without_range_support_fails_and_keeps_partial() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/norange.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(pattern(4096)))
        .mount(&mock_server)
        .await;

    let (store, temp_dir) = file_store().await;
    let local = temp_dir.path().join("norange.bin");
    std::fs::write(&local, b"partial-bytes").expect("seed partial");

    let task = active_download(
        &store,
        NewTask::download("norange.bin", local.to_string_lossy()).with_file_size(4096),
    )
    .await;
    let (ctx, _events) = transfer_context(&store, task.id, Direction::Download, 0);

    let error = executor_for(&mock_server.uri())
        .execute(&task, &ctx)
        .await
        .expect_err("resume must fail without range support");

    assert!(matches!(error, TransferError::ResumeUnsupported { .. }), "{error:?}");
    assert_eq!(error.kind(), FailureKind::ResumeUnsupported);
    assert_eq!(std::fs::read(&local).expect("read"), b"partial-bytes");
}

#[tokio::test]
async fn test_download_range_ignored_restarts_from_zero() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    let body = pattern(8192);
    Mock::given(method("GET"))
        .and(path("/restart.bin"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Accept-Ranges", "bytes")
                .set_body_bytes(body.clone()),
        )
        .mount(&mock_server)
        .await;

    let (store, temp_dir) = file_store().await;
    let local = temp_dir.path().join("restart.bin");
    std::fs::write(&local, b"stale prefix").expect("seed partial");

    let task = active_download(
        &store,
        NewTask::download("restart.bin", local.to_string_lossy()).with_file_size(8192),
    )
    .await;
    let (ctx, _events) = transfer_context(&store, task.id, Direction::Download, 0);

    executor_for(&mock_server.uri())
        .execute(&task, &ctx)
        .await
        .expect("restart should succeed");

    assert_eq!(std::fs::read(&local).expect("read"), body);
}

#[tokio::test]
async fn test_download_unauthorized_maps_to_auth_required() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;

    let (store, temp_dir) = file_store().await;
    let local = temp_dir.path().join("secret.bin");
    let task = active_download(
        &store,
        NewTask::download("secret.bin", local.to_string_lossy()),
    )
    .await;
    let (ctx, _events) = transfer_context(&store, task.id, Direction::Download, 0);

    let error = executor_for(&mock_server.uri())
        .execute(&task, &ctx)
        .await
        .expect_err("401 must fail");

    assert_eq!(error.kind(), FailureKind::AuthRequired);
    assert!(error.to_string().contains("Suggestion"), "{error}");
}

#[tokio::test]
async fn test_download_sends_bearer_token() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(header("Authorization", "Bearer s3cr3t"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (store, temp_dir) = file_store().await;
    let local = temp_dir.path().join("token.bin");
    let task = active_download(&store, NewTask::download("token.bin", local.to_string_lossy()))
        .await;
    let (ctx, _events) = transfer_context(&store, task.id, Direction::Download, 0);

    let client = HttpClient::new(&ClientOptions {
        auth_token: Some("s3cr3t".to_string()),
        ..ClientOptions::default()
    })
    .expect("client");
    DownloadExecutor::new(client, Url::parse(&mock_server.uri()).expect("url"))
        .execute(&task, &ctx)
        .await
        .expect("authorized download");

    assert_eq!(std::fs::read(&local).expect("read"), b"ok");
}

#[tokio::test]
async fn test_download_cancel_returns_promptly() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(pattern(1024))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&mock_server)
        .await;

    let (store, temp_dir) = file_store().await;
    let local = temp_dir.path().join("slow.bin");
    let task = active_download(&store, NewTask::download("slow.bin", local.to_string_lossy()))
        .await;
    let (ctx, _events) = transfer_context(&store, task.id, Direction::Download, 0);

    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let started = std::time::Instant::now();
    let error = executor_for(&mock_server.uri())
        .execute(&task, &ctx)
        .await
        .expect_err("cancelled download must fail");

    assert!(error.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(5));
}
