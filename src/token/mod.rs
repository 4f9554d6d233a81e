//! Cooperative cancellation tokens.
//!
//! A [`CancellationToken`] is created for every item the scheduler starts and
//! handed to its handler. Aborting a queue aborts the tokens of its running
//! items: the token stores the abort error (first write wins), wakes every
//! [`aborted`](CancellationToken::aborted) waiter, and invokes the registered
//! listeners exactly once.
//!
//! Abort is advisory. A handler that never looks at its token runs to
//! completion unaffected.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

use crate::queue::QueueError;

type Listener = Box<dyn FnOnce(&QueueError) + Send + 'static>;

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

/// A cooperative abort handle shared between the dispatch loop and a handler.
///
/// Cloning is cheap; all clones observe the same state.
///
/// # Examples
///
/// ```
/// use rqueues::{CancellationToken, QueueError};
///
/// let token = CancellationToken::new();
/// token.on_abort(|err| assert!(err.is_aborted()));
///
/// assert!(token.abort(QueueError::aborted()));
/// assert!(token.is_aborted());
/// assert!(token.check().is_err());
/// ```
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

struct Inner {
    id: u64,
    state: Mutex<State>,
    notify: Notify,
}

#[derive(Default)]
struct State {
    error: Option<QueueError>,
    listeners: Vec<Listener>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    /// Creates a fresh, un-aborted token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                id: NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(State::default()),
                notify: Notify::new(),
            }),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // Listeners never run under this lock, so poisoning can only come
        // from a panic in our own bookkeeping; the state stays consistent.
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `true` once the token has been aborted.
    pub fn is_aborted(&self) -> bool {
        self.state().error.is_some()
    }

    /// Returns the error the token was aborted with, if any.
    pub fn abort_error(&self) -> Option<QueueError> {
        self.state().error.clone()
    }

    /// Checkpoint for long-running handlers: `Err` once aborted.
    ///
    /// ```
    /// use rqueues::{CancellationToken, QueueError};
    ///
    /// fn step(token: &CancellationToken) -> Result<(), QueueError> {
    ///     token.check()?;
    ///     Ok(())
    /// }
    ///
    /// assert!(step(&CancellationToken::new()).is_ok());
    /// ```
    pub fn check(&self) -> Result<(), QueueError> {
        match self.abort_error() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Registers a listener invoked once when the token is aborted.
    ///
    /// Listeners run in registration order. Registering on a token that is
    /// already aborted invokes the listener immediately.
    pub fn on_abort<F>(&self, listener: F)
    where
        F: FnOnce(&QueueError) + Send + 'static,
    {
        let mut state = self.state();
        match state.error.clone() {
            Some(error) => {
                drop(state);
                listener(&error);
            }
            None => state.listeners.push(Box::new(listener)),
        }
    }

    /// Aborts the token.
    ///
    /// The first abort stores `error`; later aborts keep the original error.
    /// Pending listeners are drained and invoked with the stored error, so a
    /// repeated abort never re-fires them. Returns `true` if this call was the
    /// one that flipped the token.
    pub fn abort(&self, error: QueueError) -> bool {
        let (first, stored, listeners) = {
            let mut state = self.state();
            let first = state.error.is_none();
            if first {
                state.error = Some(error);
            }
            let stored = state.error.clone().unwrap_or_else(QueueError::aborted);
            (first, stored, std::mem::take(&mut state.listeners))
        };

        self.inner.notify.notify_waiters();
        for listener in listeners {
            listener(&stored);
        }
        first
    }

    /// Resolves with the abort error once the token is aborted.
    pub async fn aborted(&self) -> QueueError {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking the flag so a concurrent
            // abort between the check and the await cannot be missed.
            notified.as_mut().enable();
            if let Some(error) = self.abort_error() {
                return error;
            }
            notified.await;
        }
    }

    /// Sleeps for `duration`, returning early with the abort error if the
    /// token is aborted first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), QueueError> {
        self.run_until_aborted(tokio::time::sleep(duration)).await
    }

    /// Drives `future` to completion unless the token is aborted first.
    ///
    /// An already-aborted token wins over a future that is ready immediately.
    pub async fn run_until_aborted<F>(&self, future: F) -> Result<F::Output, QueueError>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            error = self.aborted() => Err(error),
            output = future => Ok(output),
        }
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("CancellationToken")
            .field("id", &self.inner.id)
            .field("error", &state.error)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}
