//! Engine configuration shared by both queues.

use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::db::{DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_MAX_CONNECTIONS, DatabaseOptions};
use crate::queue::{
    DEFAULT_CONCURRENCY, DEFAULT_DEBOUNCE_WINDOW, MAX_CONCURRENCY, MIN_CONCURRENCY, QueueConfig,
};
use crate::task::Direction;
use crate::transfer::{
    CONNECT_TIMEOUT_SECS, ClientOptions, DEFAULT_BASE_DELAY, DEFAULT_INGEST_PATH,
    DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES, DEFAULT_POLL_INTERVAL, DEFAULT_TASK_STATUS_PATH,
    DEFAULT_UPLOAD_TIMEOUT, READ_TIMEOUT_SECS, RetryPolicy, UploadEndpoints,
};

/// Default remote store address.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080/";

/// Largest accepted automatic retry count.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Largest accepted database pool size.
pub const MAX_DB_CONNECTIONS: u32 = 20;

/// Largest accepted database busy timeout.
pub const MAX_DB_BUSY_TIMEOUT_MS: u32 = 120_000;

/// Rejected configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Base URL does not parse or is not http(s).
    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl {
        /// Offending value.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Concurrency cap outside the supported range.
    #[error(
        "invalid {direction} concurrency {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// Queue the cap belongs to.
        direction: Direction,
        /// Offending value.
        value: usize,
    },

    /// A numeric field is out of range.
    #[error("invalid value for `{field}`: {value}. Expected range: {expected}")]
    OutOfRange {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: u64,
        /// Accepted range.
        expected: &'static str,
    },

    /// A duration that must be positive is zero.
    #[error("`{field}` must be greater than zero")]
    ZeroDuration {
        /// Field name.
        field: &'static str,
    },
}

/// Everything needed to build both queues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Remote store base URL; remote paths are resolved against it.
    pub base_url: String,
    /// Ingest endpoint path for uploads.
    pub ingest_path: String,
    /// Task-status endpoint path for uploads.
    pub task_status_path: String,
    /// Bearer token sent with every request.
    pub auth_token: Option<String>,
    /// Concurrent uploads.
    pub upload_concurrency: usize,
    /// Concurrent downloads.
    pub download_concurrency: usize,
    /// Automatic retries after the first attempt.
    pub max_retries: u32,
    /// First retry delay; doubles per retry.
    pub retry_base_delay: Duration,
    /// Retry delay cap.
    pub retry_max_delay: Duration,
    /// Re-admission suppression after completion.
    pub debounce_window: Duration,
    /// Upload status poll interval.
    pub poll_interval: Duration,
    /// Upload status polling ceiling.
    pub upload_timeout: Duration,
    /// HTTP connect timeout.
    pub connect_timeout: Duration,
    /// HTTP read timeout.
    pub read_timeout: Duration,
    /// Database pool size.
    pub db_max_connections: u32,
    /// Database busy timeout in milliseconds.
    pub db_busy_timeout_ms: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            ingest_path: DEFAULT_INGEST_PATH.to_string(),
            task_status_path: DEFAULT_TASK_STATUS_PATH.to_string(),
            auth_token: None,
            upload_concurrency: DEFAULT_CONCURRENCY,
            download_concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: DEFAULT_BASE_DELAY,
            retry_max_delay: DEFAULT_MAX_DELAY,
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            poll_interval: DEFAULT_POLL_INTERVAL,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            db_max_connections: DEFAULT_MAX_CONNECTIONS,
            db_busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    /// Checks every field against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;
        validate_concurrency(Direction::Upload, self.upload_concurrency)?;
        validate_concurrency(Direction::Download, self.download_concurrency)?;

        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::OutOfRange {
                field: "max_retries",
                value: u64::from(self.max_retries),
                expected: "0..=10",
            });
        }
        if !(1..=MAX_DB_CONNECTIONS).contains(&self.db_max_connections) {
            return Err(ConfigError::OutOfRange {
                field: "db_max_connections",
                value: u64::from(self.db_max_connections),
                expected: "1..=20",
            });
        }
        if self.db_busy_timeout_ms > MAX_DB_BUSY_TIMEOUT_MS {
            return Err(ConfigError::OutOfRange {
                field: "db_busy_timeout_ms",
                value: u64::from(self.db_busy_timeout_ms),
                expected: "0..=120000",
            });
        }

        for (field, value) in [
            ("retry_base_delay", self.retry_base_delay),
            ("poll_interval", self.poll_interval),
            ("upload_timeout", self.upload_timeout),
            ("connect_timeout", self.connect_timeout),
            ("read_timeout", self.read_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration { field });
            }
        }
        Ok(())
    }

    /// Parsed base URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] for unparseable or non-http(s) URLs.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.base_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBaseUrl {
                url: self.base_url.clone(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }
        Ok(url)
    }

    /// HTTP client settings.
    #[must_use]
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            auth_token: self.auth_token.clone(),
        }
    }

    /// Upload endpoint settings.
    #[must_use]
    pub fn upload_endpoints(&self) -> UploadEndpoints {
        UploadEndpoints {
            ingest_path: self.ingest_path.clone(),
            task_status_path: self.task_status_path.clone(),
            poll_interval: self.poll_interval,
            timeout: self.upload_timeout,
        }
    }

    /// Retry policy built from the retry fields.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            self.retry_base_delay,
            self.retry_max_delay,
            2.0,
        )
    }

    /// Queue settings for one direction.
    #[must_use]
    pub fn queue_config(&self, direction: Direction) -> QueueConfig {
        QueueConfig {
            concurrency: match direction {
                Direction::Upload => self.upload_concurrency,
                Direction::Download => self.download_concurrency,
            },
            debounce_window: self.debounce_window,
            retry_policy: self.retry_policy(),
        }
    }

    /// Database pool settings.
    #[must_use]
    pub fn database_options(&self) -> DatabaseOptions {
        DatabaseOptions {
            max_connections: self.db_max_connections,
            busy_timeout_ms: self.db_busy_timeout_ms,
        }
    }
}

fn validate_concurrency(direction: Direction, value: usize) -> Result<(), ConfigError> {
    if (MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidConcurrency { direction, value })
    }
}
