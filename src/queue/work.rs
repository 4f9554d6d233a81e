//! Work items and the per-name queue state they live in.

use std::collections::{BTreeSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use tokio::sync::oneshot;

use crate::context::{self, AmbientContext};
use crate::queue::error::QueueError;
use crate::token::CancellationToken;

/// A pinned, boxed, `Send` future, the erased form of a handler's future.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Type-erased unit of scheduled work.
///
/// Exactly one of [`run`](Job::run) or [`reject`](Job::reject) is called over
/// a job's lifetime, which settles the caller's handle exactly once.
pub(crate) trait Job: Send {
    /// Runs the handler under `ctx`.
    ///
    /// The caller is not settled until [`Settled::deliver`] is called, which
    /// lets the dispatch loop release the slot first.
    fn run(self: Box<Self>, ctx: AmbientContext, token: CancellationToken) -> BoxFuture<Settled>;

    /// Settles the caller with `error` without running the handler.
    fn reject(self: Box<Self>, error: QueueError);
}

/// A handler plus the reply channel of the caller that scheduled it.
pub(crate) struct Task<F, T> {
    handler: F,
    reply: oneshot::Sender<Result<T, QueueError>>,
}

impl<F, T> Task<F, T> {
    pub(crate) fn new(handler: F, reply: oneshot::Sender<Result<T, QueueError>>) -> Self {
        Self { handler, reply }
    }
}

impl<F, Fut, T> Job for Task<F, T>
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, QueueError>> + Send + 'static,
    T: Send + 'static,
{
    fn run(self: Box<Self>, ctx: AmbientContext, token: CancellationToken) -> BoxFuture<Settled> {
        let Task { handler, reply } = *self;
        Box::pin(context::scope(ctx, async move {
            let result = handler(token).await;
            let status = match &result {
                Ok(_) => Ok(()),
                Err(error) => Err(error.clone()),
            };
            Settled {
                status,
                // The caller may have dropped its handle; the work still counts.
                deliver: Box::new(move || {
                    let _ = reply.send(result);
                }),
            }
        }))
    }

    fn reject(self: Box<Self>, error: QueueError) {
        let _ = self.reply.send(Err(error));
    }
}

/// Outcome of a finished handler, not yet handed to its caller.
pub(crate) struct Settled {
    /// Mirrors what the caller will receive, for logging.
    pub(crate) status: Result<(), QueueError>,
    deliver: Box<dyn FnOnce() + Send>,
}

impl Settled {
    /// Settles the caller's handle.
    pub(crate) fn deliver(self) {
        (self.deliver)();
    }
}

/// A pending entry of a queue.
pub(crate) struct WorkItem {
    pub(crate) job: Box<dyn Job>,
    /// Ambient context captured when the item was scheduled.
    pub(crate) ctx: AmbientContext,
    /// Registry-wide schedule order, used by `await_all` to tell earlier
    /// items from later ones.
    pub(crate) seq: u64,
    /// Set by `cancel`: the item fails with this error once dispatched.
    pub(crate) canceled: Option<QueueError>,
}

impl WorkItem {
    pub(crate) fn new(job: Box<dyn Job>, ctx: AmbientContext, seq: u64) -> Self {
        Self {
            job,
            ctx,
            seq,
            canceled: None,
        }
    }
}

/// State of one live queue name.
pub(crate) struct Queue {
    pub(crate) pending: VecDeque<WorkItem>,
    pub(crate) parallelism: usize,
    /// Sequence numbers of the running items.
    pub(crate) running: BTreeSet<u64>,
    pub(crate) live_tokens: Vec<CancellationToken>,
}

impl Queue {
    pub(crate) fn new(parallelism: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            parallelism: parallelism.max(1),
            running: BTreeSet::new(),
            live_tokens: Vec::new(),
        }
    }

    /// Pending plus running items.
    pub(crate) fn size(&self) -> usize {
        self.pending.len() + self.running.len()
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.running.is_empty() && self.pending.is_empty()
    }

    /// Sequence number of the oldest item that has not settled yet.
    pub(crate) fn oldest_unsettled(&self) -> Option<u64> {
        let pending = self.pending.front().map(|item| item.seq);
        let running = self.running.first().copied();
        pending.into_iter().chain(running).min()
    }

    /// Marks every pending item to fail with `error`; returns how many.
    pub(crate) fn cancel_pending(&mut self, error: &QueueError) -> usize {
        for item in &mut self.pending {
            item.canceled = Some(error.clone());
        }
        self.pending.len()
    }
}

/// Future returned by the scheduler, settling with the handler's outcome.
///
/// Queued and debounced work runs whether or not this future is polled;
/// dropping it only discards the result. Work that runs inline (reentrant
/// scheduling) is driven by polling this future.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Scheduled<T> {
    inner: ScheduledInner<T>,
}

enum ScheduledInner<T> {
    Driven(BoxFuture<Result<T, QueueError>>),
    Queued(oneshot::Receiver<Result<T, QueueError>>),
}

impl<T> Scheduled<T> {
    pub(crate) fn driven(future: BoxFuture<Result<T, QueueError>>) -> Self {
        Self {
            inner: ScheduledInner::Driven(future),
        }
    }

    pub(crate) fn queued(receiver: oneshot::Receiver<Result<T, QueueError>>) -> Self {
        Self {
            inner: ScheduledInner::Queued(receiver),
        }
    }
}

impl<T> Future for Scheduled<T> {
    type Output = Result<T, QueueError>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().inner {
            ScheduledInner::Driven(future) => future.as_mut().poll(cx),
            ScheduledInner::Queued(receiver) => Pin::new(receiver).poll(cx).map(|received| match received {
                Ok(result) => result,
                // The sender only disappears without a reply if the handler
                // panicked or its task was torn down with the runtime.
                Err(_) => Err(QueueError::msg("task was dropped before it settled")),
            }),
        }
    }
}

impl<T> std::fmt::Debug for Scheduled<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.inner {
            ScheduledInner::Driven(_) => "driven",
            ScheduledInner::Queued(_) => "queued",
        };
        f.debug_struct("Scheduled").field("mode", &mode).finish()
    }
}
