//! Transfer progress snapshots.
//!
//! Pure arithmetic over byte counts and elapsed time; executors call
//! [`compute`] on every chunk and [`ProgressSnapshot::completed`] once at the end.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Point-in-time view of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    /// Bytes transferred so far.
    pub transferred: u64,
    /// Expected total, when known.
    pub total: Option<u64>,
    /// Whole percent, 0 when the total is unknown.
    pub percentage: u8,
    /// Average bytes per second moved by this attempt.
    pub speed: f64,
    /// Estimated time left, when both total and speed are known.
    pub remaining: Option<Duration>,
}

impl ProgressSnapshot {
    /// The single 100% snapshot emitted when a transfer finishes.
    #[must_use]
    pub fn completed(total: u64, elapsed: Duration) -> Self {
        Self::completed_since(total, 0, elapsed)
    }

    /// Like [`ProgressSnapshot::completed`] for an attempt that resumed at
    /// `baseline` bytes; speed only counts what this attempt moved.
    #[must_use]
    pub fn completed_since(total: u64, baseline: u64, elapsed: Duration) -> Self {
        let seconds = elapsed.as_secs_f64();
        let moved = total.saturating_sub(baseline);
        #[allow(clippy::cast_precision_loss)]
        let speed = if seconds > 0.0 { moved as f64 / seconds } else { 0.0 };
        Self {
            transferred: total,
            total: Some(total),
            percentage: 100,
            speed,
            remaining: Some(Duration::ZERO),
        }
    }
}

/// Computes a snapshot for `done` bytes out of `total`.
///
/// A `total` of `None` or `Some(0)` means unknown: percentage stays 0 and no
/// remaining estimate is produced.
#[must_use]
pub fn compute(done: u64, total: Option<u64>, started: Instant, now: Instant) -> ProgressSnapshot {
    compute_since(done, 0, total, started, now)
}

/// [`compute`] for an attempt that began with `baseline` bytes already in
/// place. Percentage and remaining use `done`; speed uses `done - baseline`.
#[must_use]
pub fn compute_since(
    done: u64,
    baseline: u64,
    total: Option<u64>,
    started: Instant,
    now: Instant,
) -> ProgressSnapshot {
    let total = total.filter(|total| *total > 0);
    let elapsed = now.saturating_duration_since(started).as_secs_f64();
    let moved = done.saturating_sub(baseline);

    #[allow(clippy::cast_precision_loss)]
    let speed = if elapsed > 0.0 { moved as f64 / elapsed } else { 0.0 };

    let percentage = total.map_or(0, |total| percent_of(done, total));

    let remaining = total.and_then(|total| {
        if done >= total {
            Some(Duration::ZERO)
        } else if speed > 0.0 {
            #[allow(clippy::cast_precision_loss)]
            let left = (total - done) as f64;
            Duration::try_from_secs_f64(left / speed).ok()
        } else {
            None
        }
    });

    ProgressSnapshot {
        transferred: done,
        total,
        percentage,
        speed,
        remaining,
    }
}

/// Whole percent of `done / total`, rounded and clamped to 100.
#[must_use]
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let scaled = (u128::from(done) * 100 + u128::from(total) / 2) / u128::from(total);
    u8::try_from(scaled.min(100)).unwrap_or(100)
}
