//! Retry logic with exponential backoff for transient transfer failures.
//!
//! When an executor fails, the error is classified into a [`FailureClass`]:
//! - [`FailureClass::Transient`] - may succeed on retry (network, 5xx, 408, 429, truncated body)
//! - [`FailureClass::Fatal`] - will not succeed regardless of retries
//! - [`FailureClass::Cancelled`] - caller intent, never retried
//!
//! [`RetryPolicy::decide`] then turns the class and the task's retry counter
//! into a [`RetryDecision`].
//!
//! # Example
//!
//! ```
//! use transferq_core::transfer::{RetryDecision, RetryPolicy, TransferError};
//!
//! let policy = RetryPolicy::default();
//! let error = TransferError::http_status("https://store.example/a.bin", 503);
//!
//! match policy.decide(&error, 0) {
//!     RetryDecision::Retry { delay, retry_count } => {
//!         println!("retry #{retry_count} in {delay:?}");
//!     }
//!     RetryDecision::Fail { resumable, reason } => {
//!         println!("giving up (resumable: {resumable}): {reason}");
//!     }
//!     RetryDecision::Stop => println!("cancelled"),
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::TransferError;

/// Default retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default backoff multiplier (doubles each retry).
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Whether a failure is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Temporary failure that may succeed on retry.
    Transient,
    /// Permanent failure.
    Fatal,
    /// Stopped by caller intent.
    Cancelled,
}

/// What the queue should do with a failed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Return the task to the queue after `delay`.
    Retry {
        /// Backoff before the task becomes eligible again.
        delay: Duration,
        /// Retry counter value to persist.
        retry_count: u32,
    },

    /// Mark the task failed.
    Fail {
        /// Whether a later resume may continue from partial progress.
        resumable: bool,
        /// Human-readable reason.
        reason: String,
    },

    /// Caller intent; the queue applies the requested interruption instead.
    Stop,
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * multiplier^retry_count, max_delay) + jitter
/// ```
///
/// `retry_count` is the value before the increment, so the defaults produce
/// 1s, 2s, 4s. Jitter is off unless configured.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_jitter: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with custom settings and no jitter.
    #[must_use]
    pub fn new(
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: max_delay.max(base_delay),
            backoff_multiplier: backoff_multiplier.max(1.0),
            max_jitter: Duration::ZERO,
        }
    }

    /// Adds up to `max_jitter` of random delay to every backoff.
    #[must_use]
    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Returns the configured retry ceiling.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Decides what to do after `error` on a task that has used `retry_count` retries.
    #[instrument(skip(self, error), fields(max_retries = self.max_retries, kind = %error.kind()))]
    pub fn decide(&self, error: &TransferError, retry_count: u32) -> RetryDecision {
        match classify_error(error) {
            FailureClass::Cancelled => RetryDecision::Stop,
            FailureClass::Fatal => {
                debug!("fatal failure, not retrying");
                RetryDecision::Fail {
                    resumable: permits_resume(error),
                    reason: error.to_string(),
                }
            }
            FailureClass::Transient if retry_count >= self.max_retries => {
                debug!(retry_count, "retry budget exhausted");
                RetryDecision::Fail {
                    resumable: permits_resume(error),
                    reason: format!("{error} (gave up after {retry_count} retries)"),
                }
            }
            FailureClass::Transient => {
                let delay = self.delay_for(retry_count);
                debug!(retry_count, delay_ms = delay.as_millis(), "will retry");
                RetryDecision::Retry {
                    delay,
                    retry_count: retry_count + 1,
                }
            }
        }
    }

    /// Backoff for a task that has used `retry_count` retries.
    #[must_use]
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let scaled = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = Duration::try_from_secs_f64(scaled)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        capped + self.jitter()
    }

    fn jitter(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        let max_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// Classifies a transfer error for retry decisions.
///
/// # HTTP Status Code Classification
///
/// | Status | Class | Rationale |
/// |--------|-------|-----------|
/// | 401/403/407 | Fatal | Credentials problem, surfaced as `AuthRequired` |
/// | 408 | Transient | Request timeout |
/// | 429 | Transient | Rate limited, backoff helps |
/// | other 4xx | Fatal | Request will not get better |
/// | 5xx | Transient | Server may recover |
///
/// # Non-HTTP Errors
///
/// | Error | Class | Rationale |
/// |-------|-------|-----------|
/// | RequestTimeout | Transient | Network may recover |
/// | Network (most) | Transient | Server may come back |
/// | Network (TLS) | Fatal | Certificate/config issue |
/// | Truncated | Transient | Connection dropped mid-body |
/// | ResumeUnsupported | Fatal | Server will not honour ranges |
/// | RemoteTaskFailed | Fatal | Remote side rejected the file |
/// | Timeout | Fatal | Polling ceiling reached |
/// | LocalIo | Fatal | Local file system issue |
/// | InvalidUrl / InvalidResponse | Fatal | Will not succeed |
#[must_use]
pub fn classify_error(error: &TransferError) -> FailureClass {
    match error {
        TransferError::HttpStatus { status, .. } => classify_http_status(*status),
        TransferError::RequestTimeout { .. } | TransferError::Truncated { .. } => {
            FailureClass::Transient
        }
        TransferError::Network { source, .. } => {
            if is_tls_error(source) {
                FailureClass::Fatal
            } else {
                FailureClass::Transient
            }
        }
        TransferError::AuthRequired { .. }
        | TransferError::ResumeUnsupported { .. }
        | TransferError::RemoteTaskFailed { .. }
        | TransferError::Timeout { .. }
        | TransferError::LocalIo { .. }
        | TransferError::InvalidUrl { .. }
        | TransferError::InvalidResponse { .. } => FailureClass::Fatal,
        TransferError::Cancelled => FailureClass::Cancelled,
    }
}

/// Whether a task that failed with `error` may later continue from its partial bytes.
///
/// Network-type failures keep the partial data; everything that says the
/// request or the partial data itself is wrong forces a fresh start.
#[must_use]
pub fn permits_resume(error: &TransferError) -> bool {
    match error {
        TransferError::Network { .. }
        | TransferError::RequestTimeout { .. }
        | TransferError::Truncated { .. } => true,
        TransferError::HttpStatus { status, .. } => {
            classify_http_status(*status) == FailureClass::Transient
        }
        _ => false,
    }
}

#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureClass {
    match status {
        408 => FailureClass::Transient, // Request Timeout
        429 => FailureClass::Transient, // Too Many Requests
        400..=499 => FailureClass::Fatal,
        500..=599 => FailureClass::Transient,
        // Anything else is unexpected, treat as fatal
        _ => FailureClass::Fatal,
    }
}

/// Checks if a reqwest error is a TLS/certificate error.
fn is_tls_error(error: &reqwest::Error) -> bool {
    let error_string = error.to_string().to_lowercase();
    error_string.contains("certificate")
        || error_string.contains("tls")
        || error_string.contains("ssl")
        || error_string.contains("handshake")
}
