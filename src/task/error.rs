//! Error types for task store operations.

use std::fmt;

use thiserror::Error;

use super::{TaskId, TaskStatus};

/// Structured classification for database failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreDbErrorKind {
    /// `SQLite` returned busy/locked under concurrent access.
    BusyOrLocked,
    /// Constraint failure (unique/foreign-key/check/not-null).
    ConstraintViolation,
    /// Connection pool timed out waiting for a free connection.
    PoolTimeout,
    /// Connection pool is closed.
    PoolClosed,
    /// Expected row was not found.
    RowNotFound,
    /// Filesystem or transport IO failure.
    Io,
    /// SQL protocol/driver error.
    Protocol,
    /// Unclassified database failure.
    Other,
}

impl StoreDbErrorKind {
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => Self::PoolTimeout,
            sqlx::Error::PoolClosed => Self::PoolClosed,
            sqlx::Error::RowNotFound => Self::RowNotFound,
            sqlx::Error::Io(_) => Self::Io,
            sqlx::Error::Protocol(_) => Self::Protocol,
            sqlx::Error::Database(database_error) => {
                classify_database_error(database_error.as_ref())
            }
            _ => Self::Other,
        }
    }
}

impl fmt::Display for StoreDbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BusyOrLocked => "busy_or_locked",
            Self::ConstraintViolation => "constraint_violation",
            Self::PoolTimeout => "pool_timeout",
            Self::PoolClosed => "pool_closed",
            Self::RowNotFound => "row_not_found",
            Self::Io => "io",
            Self::Protocol => "protocol",
            Self::Other => "other",
        };
        write!(f, "{label}")
    }
}

fn classify_database_error(
    database_error: &(dyn sqlx::error::DatabaseError + 'static),
) -> StoreDbErrorKind {
    let code = database_error.code();
    if matches!(
        code.as_deref(),
        Some("SQLITE_BUSY" | "SQLITE_LOCKED" | "5" | "6")
    ) {
        return StoreDbErrorKind::BusyOrLocked;
    }

    if database_error.is_unique_violation()
        || database_error.is_foreign_key_violation()
        || database_error.is_check_violation()
        || code
            .as_deref()
            .is_some_and(|value| value.starts_with("SQLITE_CONSTRAINT"))
    {
        return StoreDbErrorKind::ConstraintViolation;
    }

    let message = database_error.message().to_ascii_lowercase();
    if message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("database is busy")
    {
        return StoreDbErrorKind::BusyOrLocked;
    }

    StoreDbErrorKind::Other
}

/// Errors that can occur during task store operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error ({kind}): {message}")]
    Database {
        /// Typed classification.
        kind: StoreDbErrorKind,
        /// Human-readable database error text.
        message: String,
    },

    /// Task not found.
    #[error(
        "transfer task not found: id {0}\n  Suggestion: The task may have been cleared or the ID is incorrect"
    )]
    TaskNotFound(TaskId),

    /// The lifecycle forbids the requested move.
    #[error("task {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Task identifier.
        id: TaskId,
        /// Current status.
        from: TaskStatus,
        /// Requested status.
        to: TaskStatus,
    },

    /// The row changed between read and conditional write.
    #[error("task {id} changed concurrently (expected status {expected})")]
    StatusChanged {
        /// Task identifier.
        id: TaskId,
        /// Status the write was conditioned on.
        expected: TaskStatus,
    },

    /// A failed task marked non-resumable was asked to return to the queue.
    #[error(
        "task {0} failed permanently and cannot be resumed\n  Suggestion: Retry it instead to start a fresh transfer"
    )]
    NotResumable(TaskId),

    /// Active tasks must be cancelled before they are removed.
    #[error("task {0} is active and cannot be removed\n  Suggestion: Cancel it first")]
    ActiveTaskRemoval(TaskId),

    /// A stored value could not be parsed.
    #[error("invalid {field} value '{value}'")]
    InvalidValue {
        /// Column name.
        field: &'static str,
        /// Offending value.
        value: String,
    },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            kind: StoreDbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl StoreError {
    /// Creates an `InvalidValue` error.
    #[must_use]
    pub fn invalid_value(field: &'static str, value: &str) -> Self {
        Self::InvalidValue {
            field,
            value: value.to_string(),
        }
    }

    /// Returns the typed database error kind, when this is a database error.
    #[must_use]
    pub fn database_kind(&self) -> Option<StoreDbErrorKind> {
        match self {
            Self::Database { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns true when this error is a database busy/locked condition.
    #[must_use]
    pub fn is_busy_or_locked(&self) -> bool {
        self.database_kind() == Some(StoreDbErrorKind::BusyOrLocked)
    }

    /// True when repeating the same write may succeed later.
    ///
    /// Database failures are transient except constraint violations and a
    /// closed pool. Lifecycle and lookup errors are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database { kind, .. } => !matches!(
                kind,
                StoreDbErrorKind::ConstraintViolation | StoreDbErrorKind::PoolClosed
            ),
            _ => false,
        }
    }

    /// True when a competing writer won the race for this row.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::StatusChanged { .. } | Self::InvalidTransition { .. }
        )
    }
}
