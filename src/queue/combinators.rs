//! Cancellation, debounce and drain, all expressed through `schedule`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::context;
use crate::queue::error::QueueError;
use crate::queue::registry::QueueRegistry;
use crate::queue::work::Scheduled;
use crate::token::CancellationToken;

impl QueueRegistry {
    /// Cancels every pending item of queue `name`.
    ///
    /// Each pending item fails with `error` (default: [`QueueError::canceled`])
    /// once the dispatch loop reaches it. Running items are untouched.
    /// Returns the number of items marked.
    pub fn cancel(&self, name: impl AsRef<str>, error: Option<QueueError>) -> usize {
        let error = error.unwrap_or_else(QueueError::canceled);
        let mut queues = self.queues();
        let Some(queue) = queues.get_mut(name.as_ref()) else {
            return 0;
        };
        let canceled = queue.cancel_pending(&error);
        if canceled > 0 {
            debug!(queue = name.as_ref(), canceled, "canceled pending items");
        }
        canceled
    }

    /// Cancels the pending items of queue `name` and aborts its running items.
    ///
    /// Every live token of the queue is aborted with `error` (default:
    /// [`QueueError::aborted`]); their listeners fire once and the queue
    /// forgets them. Abort is advisory: handlers that ignore their token run
    /// to completion.
    pub fn abort(&self, name: impl AsRef<str>, error: Option<QueueError>) {
        let error = error.unwrap_or_else(QueueError::aborted);
        let tokens: Vec<CancellationToken> = {
            let mut queues = self.queues();
            let Some(queue) = queues.get_mut(name.as_ref()) else {
                return;
            };
            queue.cancel_pending(&error);
            std::mem::take(&mut queue.live_tokens)
        };

        if !tokens.is_empty() {
            debug!(queue = name.as_ref(), running = tokens.len(), error = %error, "aborting running items");
        }
        // Listeners may schedule more work, so they run without the lock.
        for token in tokens {
            token.abort(error.clone());
        }
    }

    /// Applies [`abort`](Self::abort) to every live queue.
    pub fn abort_all(&self, error: Option<QueueError>) {
        let names: Vec<Arc<str>> = self.queues().keys().cloned().collect();
        for name in names {
            self.abort(&*name, error.clone());
        }
    }

    /// Coalesces rapid repeated triggers on `name` into one delayed run of
    /// the latest `handler`.
    ///
    /// Aborts whatever wait or work is live on `name` with
    /// [`QueueError::Debounced`], then waits `delay` on the same queue. Only if
    /// that wait is not superseded is `handler` scheduled, again on `name`.
    /// Superseded calls settle with [`QueueError::Debounced`].
    ///
    /// Like [`schedule`](Self::schedule), the trigger takes effect whether or
    /// not the returned future is polled; dropping it only discards the result.
    pub fn debounce<F, Fut, T>(&self, name: impl AsRef<str>, delay: Duration, handler: F) -> Scheduled<T>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, QueueError>> + Send + 'static,
        T: Send + 'static,
    {
        let name: Arc<str> = Arc::from(name.as_ref());
        self.abort(&*name, Some(QueueError::Debounced));

        let wait = self.schedule(&*name, move |token: CancellationToken| async move {
            token.sleep(delay).await
        });

        let (reply, receiver) = oneshot::channel();
        let registry = self.clone();
        let queue = Arc::clone(&name);
        let follow_up = context::scope(context::current(), async move {
            let result = match wait.await {
                Ok(()) => registry.schedule(&*queue, handler).await,
                Err(e) => Err(e),
            };
            let _ = reply.send(result);
        });

        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(follow_up);
            }
            // Dropping the follow-up drops `reply`, which fails the caller.
            Err(e) => error!(queue = %name, error = %e, "cannot debounce outside of a Tokio runtime"),
        }
        Scheduled::queued(receiver)
    }

    /// Waits until everything scheduled before this call has settled.
    ///
    /// Every item gets a registry-wide sequence number when it is scheduled;
    /// this call records the current one and waits, queue by queue, until no
    /// older item is pending or running. Queues drain concurrently. Unless
    /// disabled in the [`SchedulerConfig`](crate::SchedulerConfig), a queue
    /// that takes longer than the drain warning threshold is reported with a
    /// warning; waiting continues regardless.
    ///
    /// Queues held by the calling chain are skipped: their remaining items can
    /// only settle after the caller does.
    pub async fn await_all(&self) {
        let ctx = context::current();
        let mark = self.seq_mark();
        let names: Vec<Arc<str>> = self
            .queues()
            .iter()
            .filter(|(_, queue)| queue.size() > 0)
            .map(|(name, _)| Arc::clone(name))
            .collect();

        let warn_after = self.inner.config.drain_warning();
        let mut drains = JoinSet::new();
        for name in names {
            if ctx.held_token(self.inner.id, &name).is_some() {
                debug!(queue = %name, "skipping queue held by the caller while draining");
                continue;
            }
            drains.spawn(wait_for_drain(self.clone(), name, mark, warn_after));
        }

        while drains.join_next().await.is_some() {}
    }
}

async fn wait_for_drain(registry: QueueRegistry, name: Arc<str>, mark: u64, warn_after: Option<Duration>) {
    let drained = registry.settled_before(&name, mark);
    tokio::pin!(drained);
    if let Some(limit) = warn_after {
        match tokio::time::timeout(limit, &mut drained).await {
            Ok(()) => return,
            Err(_) => warn!(
                queue = %name,
                waited = ?limit,
                "queue has not drained yet; possible deadlock or long-running task"
            ),
        }
    }
    drained.await;
}
