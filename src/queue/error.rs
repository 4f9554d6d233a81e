//! Outcome taxonomy for scheduled work.
//!
//! Every scheduled item settles with either its handler's value or a
//! [`QueueError`]. Three of the four variants describe *expected* control flow
//! (a newer debounce trigger, an explicit cancel, a cooperative abort); only
//! [`QueueError::Failed`] represents a genuine handler failure.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

/// Convenience alias for results produced by scheduled work.
pub type QueueResult<T> = Result<T, QueueError>;

/// Shared, type-erased cause of a [`QueueError::Failed`].
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced to callers of the scheduler.
///
/// `QueueError` is `Clone` because a single abort error is delivered to every
/// live token and every pending item of a queue.
///
/// # Examples
///
/// ```
/// use rqueues::QueueError;
///
/// let err = QueueError::canceled();
/// assert!(err.is_canceled());
/// assert!(err.is_expected());
///
/// let err = QueueError::msg("payment provider unreachable");
/// assert!(err.is_failed());
/// assert!(!err.is_expected());
/// ```
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    /// Superseded by a newer `debounce` trigger on the same queue.
    #[error("debounced: superseded by a newer trigger")]
    Debounced,

    /// The item was still pending when its queue was canceled.
    #[error("canceled: {reason}")]
    Canceled { reason: Cow<'static, str> },

    /// The item was told to stop cooperatively.
    #[error("aborted: {reason}")]
    Aborted { reason: Cow<'static, str> },

    /// The handler itself failed.
    #[error("task failed: {0}")]
    Failed(#[source] Cause),
}

/// Discriminant of a [`QueueError`], for reporting and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Debounced,
    Canceled,
    Aborted,
    Failed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Debounced => "debounced",
            Self::Canceled => "canceled",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Plain-text failure used by [`QueueError::msg`].
#[derive(Debug, Error)]
#[error("{0}")]
struct Message(String);

impl QueueError {
    /// A `Canceled` error with the default reason.
    pub fn canceled() -> Self {
        Self::Canceled {
            reason: Cow::Borrowed("canceled"),
        }
    }

    /// A `Canceled` error carrying a custom reason.
    pub fn canceled_with(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::Canceled {
            reason: reason.into(),
        }
    }

    /// An `Aborted` error with the default reason.
    pub fn aborted() -> Self {
        Self::Aborted {
            reason: Cow::Borrowed("aborted"),
        }
    }

    /// An `Aborted` error carrying a custom reason, e.g. `"shutting down"`.
    pub fn aborted_with(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    /// Wraps any error as a handler failure.
    pub fn failed<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Failed(Arc::new(error))
    }

    /// A handler failure described by a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::failed(Message(message.into()))
    }

    /// Returns the discriminant of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Debounced => ErrorKind::Debounced,
            Self::Canceled { .. } => ErrorKind::Canceled,
            Self::Aborted { .. } => ErrorKind::Aborted,
            Self::Failed(_) => ErrorKind::Failed,
        }
    }

    pub fn is_debounced(&self) -> bool {
        matches!(self, Self::Debounced)
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled { .. })
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Returns `true` for supersession and cancellation outcomes, which callers
    /// should treat as normal control flow rather than bugs.
    pub fn is_expected(&self) -> bool {
        !self.is_failed()
    }

    /// Returns the underlying cause of a `Failed` error.
    pub fn cause(&self) -> Option<&Cause> {
        match self {
            Self::Failed(cause) => Some(cause),
            _ => None,
        }
    }
}

impl From<std::io::Error> for QueueError {
    fn from(error: std::io::Error) -> Self {
        Self::failed(error)
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(error: serde_json::Error) -> Self {
        Self::failed(error)
    }
}

impl From<Box<dyn std::error::Error + Send + Sync + 'static>> for QueueError {
    fn from(error: Box<dyn std::error::Error + Send + Sync + 'static>) -> Self {
        Self::Failed(Arc::from(error))
    }
}
