//! Error types for transfer execution.
//!
//! Every executor failure carries enough context (url, path, remote task id)
//! for a useful log line, and maps onto a coarse [`FailureKind`] that is
//! persisted with the task and surfaced in events.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Coarse failure category stored in `error_kind` and carried by `Failed` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connection, timeout, truncated body, or retryable HTTP status.
    Network,
    /// Resume requested but the server does not honour ranges.
    ResumeUnsupported,
    /// Remote ingestion finished in a failed state.
    RemoteTaskFailed,
    /// Upload polling exceeded its ceiling.
    Timeout,
    /// Local filesystem error.
    LocalIo,
    /// Credentials missing or rejected.
    AuthRequired,
    /// The request itself was invalid (bad URL, 4xx, malformed response).
    InvalidRequest,
    /// Stopped by caller intent.
    Cancelled,
}

impl FailureKind {
    /// Returns the string stored in the database.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::ResumeUnsupported => "resume_unsupported",
            Self::RemoteTaskFailed => "remote_task_failed",
            Self::Timeout => "timeout",
            Self::LocalIo => "local_io",
            Self::AuthRequired => "auth_required",
            Self::InvalidRequest => "invalid_request",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while executing a transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Network-level error (DNS resolution, connection refused, reset, TLS).
    #[error("network error for {url}: {source}")]
    Network {
        /// The URL being fetched.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Connect or read timed out.
    #[error("request timed out for {url}")]
    RequestTimeout {
        /// The URL that timed out.
        url: String,
    },

    /// Non-success HTTP response.
    #[error("HTTP {status} for {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Credentials missing or rejected.
    #[error(
        "[AUTH] authentication required (HTTP {status}) for {url}\n  Suggestion: Check the configured auth token"
    )]
    AuthRequired {
        /// The URL that requires authentication.
        url: String,
        /// The HTTP status code (401, 403, or 407).
        status: u16,
    },

    /// The body ended before the advertised length.
    #[error("transfer of {path} ended early: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Local file being written.
        path: PathBuf,
        /// Advertised total.
        expected: u64,
        /// Bytes actually on disk.
        actual: u64,
    },

    /// Resume requested but the server advertised no range support.
    #[error("server does not support resuming {url} from byte {offset}")]
    ResumeUnsupported {
        /// The URL being fetched.
        url: String,
        /// Requested resume offset.
        offset: u64,
    },

    /// The remote ingestion task reported failure.
    #[error("remote task {remote_task_id} failed: {message}")]
    RemoteTaskFailed {
        /// Identifier returned by the ingest endpoint.
        remote_task_id: String,
        /// Error text reported by the remote side.
        message: String,
    },

    /// Upload polling did not observe a terminal state in time.
    #[error("remote task {remote_task_id} did not finish within {limit:?}")]
    Timeout {
        /// Identifier returned by the ingest endpoint.
        remote_task_id: String,
        /// The polling ceiling that was exceeded.
        limit: Duration,
    },

    /// File system error (open, create, write, metadata).
    #[error("IO error on {path}: {source}")]
    LocalIo {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The remote path could not be turned into a URL.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The server answered with something we cannot interpret.
    #[error("unexpected response from {url}: {reason}")]
    InvalidResponse {
        /// The URL that answered.
        url: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Stopped by caller intent.
    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    /// Creates a network error, folding reqwest timeouts into [`TransferError::RequestTimeout`].
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return Self::RequestTimeout { url: url.into() };
        }
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates an authentication-required error.
    pub fn auth_required(url: impl Into<String>, status: u16) -> Self {
        Self::AuthRequired {
            url: url.into(),
            status,
        }
    }

    /// Creates a request timeout error.
    pub fn request_timeout(url: impl Into<String>) -> Self {
        Self::RequestTimeout { url: url.into() }
    }

    /// Creates a local IO error.
    pub fn local_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::LocalIo {
            path: path.into(),
            source,
        }
    }

    /// Creates a truncated-body error.
    pub fn truncated(path: impl Into<PathBuf>, expected: u64, actual: u64) -> Self {
        Self::Truncated {
            path: path.into(),
            expected,
            actual,
        }
    }

    /// Creates a resume-unsupported error.
    pub fn resume_unsupported(url: impl Into<String>, offset: u64) -> Self {
        Self::ResumeUnsupported {
            url: url.into(),
            offset,
        }
    }

    /// Creates a remote-task-failed error.
    pub fn remote_task_failed(remote_task_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RemoteTaskFailed {
            remote_task_id: remote_task_id.into(),
            message: message.into(),
        }
    }

    /// Creates an upload polling timeout error.
    pub fn timeout(remote_task_id: impl Into<String>, limit: Duration) -> Self {
        Self::Timeout {
            remote_task_id: remote_task_id.into(),
            limit,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an invalid response error.
    pub fn invalid_response(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Maps the error onto its persisted category.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Network { .. } | Self::RequestTimeout { .. } | Self::Truncated { .. } => {
                FailureKind::Network
            }
            Self::HttpStatus { status, .. } => {
                if *status == 408 || *status == 429 || *status >= 500 {
                    FailureKind::Network
                } else {
                    FailureKind::InvalidRequest
                }
            }
            Self::AuthRequired { .. } => FailureKind::AuthRequired,
            Self::ResumeUnsupported { .. } => FailureKind::ResumeUnsupported,
            Self::RemoteTaskFailed { .. } => FailureKind::RemoteTaskFailed,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::LocalIo { .. } => FailureKind::LocalIo,
            Self::InvalidUrl { .. } | Self::InvalidResponse { .. } => FailureKind::InvalidRequest,
            Self::Cancelled => FailureKind::Cancelled,
        }
    }

    /// True when the caller stopped the transfer.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

// No `From<reqwest::Error>` / `From<std::io::Error>`: every variant needs the
// url or path, which the source errors do not carry.
