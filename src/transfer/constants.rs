//! Constants for transfer execution (timeouts, polling, protocol headers).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Interval between remote task status polls after an upload.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Ceiling on how long an upload may wait for remote ingestion to finish.
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Header naming the destination path of an uploaded file (URL-encoded).
pub const FILE_PATH_HEADER: &str = "File-Path";

/// Default ingest endpoint, relative to the store base URL.
pub const DEFAULT_INGEST_PATH: &str = "/api/ingest";

/// Default remote task status endpoint, relative to the store base URL.
pub const DEFAULT_TASK_STATUS_PATH: &str = "/api/tasks/status";
