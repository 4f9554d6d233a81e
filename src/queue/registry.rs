//! The queue registry and its dispatch loop.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{Notify, oneshot};
use tracing::{debug, error, trace, warn};

use crate::config::SchedulerConfig;
use crate::context::{self, HeldQueue};
use crate::queue::error::QueueError;
use crate::queue::work::{Queue, Scheduled, Task, WorkItem};
use crate::token::CancellationToken;

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Point-in-time view of one live queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub name: String,
    pub pending: usize,
    pub running: usize,
    pub parallelism: usize,
}

/// A set of named queues, each serializing the work scheduled under its name.
///
/// `QueueRegistry` is a cheap, cloneable handle; clones share the same queues.
/// Hosts typically create one per service and pass it to every collaborator
/// that mutates a shared resource, while tests create their own for isolation.
///
/// # Examples
///
/// ```rust,no_run
/// use rqueues::{QueueRegistry, QueueError};
///
/// # async fn settle(payment_id: u64) -> Result<(), QueueError> { Ok(()) }
/// #[tokio::main]
/// async fn main() -> Result<(), QueueError> {
///     let registry = QueueRegistry::new();
///
///     // Two updates of the same payment never overlap.
///     let first = registry.schedule("payment-42", |_token| settle(42));
///     let second = registry.schedule("payment-42", |_token| settle(42));
///     first.await?;
///     second.await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct QueueRegistry {
    pub(crate) inner: Arc<Shared>,
}

pub(crate) struct Shared {
    pub(crate) id: u64,
    pub(crate) config: SchedulerConfig,
    pub(crate) queues: Mutex<HashMap<Arc<str>, Queue>>,
    /// Next item sequence number; only advanced under the `queues` lock.
    pub(crate) next_seq: AtomicU64,
    /// Signalled whenever an item leaves a queue.
    pub(crate) settled: Notify,
}

/// What the dispatch loop should do next for a queue.
enum Step {
    Start(WorkItem, CancellationToken),
    Reject(WorkItem, QueueError),
    Idle,
}

impl Default for QueueRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueRegistry {
    /// Creates a registry with the default configuration.
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Creates a registry with the given configuration.
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(Shared {
                id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
                config,
                queues: Mutex::new(HashMap::new()),
                next_seq: AtomicU64::new(0),
                settled: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Locks the queue map.
    ///
    /// The lock is only ever held for synchronous bookkeeping, so a poisoned
    /// map is still consistent; recover it instead of propagating the panic.
    pub(crate) fn queues(&self) -> MutexGuard<'_, HashMap<Arc<str>, Queue>> {
        self.inner.queues.lock().unwrap_or_else(|poisoned| {
            warn!("queue registry lock was poisoned; recovering");
            poisoned.into_inner()
        })
    }

    /// Schedules `handler` on queue `name` with the configured default
    /// parallelism (1 unless configured otherwise).
    ///
    /// See [`schedule_with_parallelism`](Self::schedule_with_parallelism).
    pub fn schedule<F, Fut, T>(&self, name: impl AsRef<str>, handler: F) -> Scheduled<T>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, QueueError>> + Send + 'static,
        T: Send + 'static,
    {
        self.schedule_with_parallelism(name, self.inner.config.default_parallelism, handler)
    }

    /// Schedules `handler` on queue `name`, allowing at most `parallelism`
    /// items of that queue to run at once.
    ///
    /// The item is enqueued before this method returns, so call order is
    /// start order. The returned [`Scheduled`] settles with the handler's
    /// result; dropping it does not cancel the work.
    ///
    /// If the current call chain already runs under `name` (the handler of an
    /// item of this queue, directly or transitively, scheduled it), the handler
    /// runs inline when the returned future is awaited, receiving the token of
    /// the enclosing item. Waiting behind itself would deadlock.
    ///
    /// `parallelism` only takes effect when the queue is created; a live queue
    /// keeps the value it was created with.
    pub fn schedule_with_parallelism<F, Fut, T>(
        &self,
        name: impl AsRef<str>,
        parallelism: usize,
        handler: F,
    ) -> Scheduled<T>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, QueueError>> + Send + 'static,
        T: Send + 'static,
    {
        let name: Arc<str> = Arc::from(name.as_ref());
        let ctx = context::current();

        if let Some(token) = ctx.held_token(self.inner.id, &name) {
            trace!(queue = %name, "reentrant schedule; running inline");
            return Scheduled::driven(Box::pin(context::scope(ctx, async move {
                handler(token).await
            })));
        }

        let (reply, receiver) = oneshot::channel();
        let job = Box::new(Task::new(handler, reply));
        {
            let mut queues = self.queues();
            let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
            let queue = queues
                .entry(Arc::clone(&name))
                .or_insert_with(|| Queue::new(parallelism));
            if queue.parallelism != parallelism.max(1) {
                debug!(
                    queue = %name,
                    requested = parallelism,
                    established = queue.parallelism,
                    "keeping established parallelism of live queue"
                );
            }
            queue.pending.push_back(WorkItem::new(job, ctx, seq));
        }

        self.dispatch(&name);
        Scheduled::queued(receiver)
    }

    /// Starts as many pending items of `name` as its parallelism allows.
    ///
    /// Called after every enqueue and every settlement, so a freed slot is
    /// reused immediately. Deletes the registry entry once the queue is idle.
    pub(crate) fn dispatch(&self, name: &Arc<str>) {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(queue = %name, error = %e, "cannot dispatch outside of a Tokio runtime");
                self.reject_pending(name, QueueError::msg(format!("no Tokio runtime available: {e}")));
                return;
            }
        };

        loop {
            match self.next_step(name) {
                Step::Idle => return,
                Step::Reject(item, error) => {
                    trace!(queue = %name, error = %error, "rejecting canceled item");
                    item.job.reject(error);
                    self.inner.settled.notify_waiters();
                }
                Step::Start(item, token) => self.start(&runtime, name, item, token),
            }
        }
    }

    fn next_step(&self, name: &Arc<str>) -> Step {
        let mut queues = self.queues();
        let Some(queue) = queues.get_mut(name) else {
            return Step::Idle;
        };

        if queue.running.len() >= queue.parallelism {
            return Step::Idle;
        }

        let Some(mut item) = queue.pending.pop_front() else {
            if queue.is_idle() {
                queues.remove(name);
                trace!(queue = %name, "queue drained");
            }
            return Step::Idle;
        };

        if let Some(error) = item.canceled.take() {
            return Step::Reject(item, error);
        }

        let token = CancellationToken::new();
        queue.running.insert(item.seq);
        queue.live_tokens.push(token.clone());
        debug_assert!(queue.running.len() <= queue.parallelism);
        Step::Start(item, token)
    }

    fn start(&self, runtime: &Handle, name: &Arc<str>, item: WorkItem, token: CancellationToken) {
        trace!(queue = %name, "starting item");

        // Created before spawning: if the task is dropped unpolled (runtime
        // shutdown) the slot is still released.
        let slot = Slot {
            registry: self.clone(),
            name: Arc::clone(name),
            token_id: token.id(),
            seq: item.seq,
        };
        let ctx = item.ctx.holding(HeldQueue {
            registry: self.inner.id,
            name: Arc::clone(name),
            token: token.clone(),
        });

        let job = item.job;
        runtime.spawn(async move {
            let slot = slot;
            let settled = job.run(ctx, token).await;
            match &settled.status {
                Ok(()) => trace!(queue = %slot.name, "item succeeded"),
                Err(e) if e.is_expected() => {
                    debug!(queue = %slot.name, kind = %e.kind(), error = %e, "item settled early")
                }
                Err(e) => error!(queue = %slot.name, error = ?e, "item failed"),
            }
            // Bookkeeping first, so a caller that observes the result also
            // observes the freed slot.
            drop(slot);
            settled.deliver();
        });
    }

    /// Frees the slot held by a settled item and dispatches the next one.
    fn release(&self, name: &Arc<str>, token_id: u64, seq: u64) {
        {
            let mut queues = self.queues();
            if let Some(queue) = queues.get_mut(name) {
                queue.running.remove(&seq);
                queue.live_tokens.retain(|token| token.id() != token_id);
            }
        }
        self.inner.settled.notify_waiters();
        self.dispatch(name);
    }

    fn reject_pending(&self, name: &Arc<str>, error: QueueError) {
        let drained: Vec<WorkItem> = {
            let mut queues = self.queues();
            let Some(queue) = queues.get_mut(name) else {
                return;
            };
            let drained = queue.pending.drain(..).collect();
            if queue.is_idle() {
                queues.remove(name);
            }
            drained
        };

        for item in drained {
            item.job.reject(error.clone());
        }
        self.inner.settled.notify_waiters();
    }

    /// Sequence number the next scheduled item will get. Everything scheduled
    /// so far has a smaller one.
    pub(crate) fn seq_mark(&self) -> u64 {
        let _queues = self.queues();
        self.inner.next_seq.load(Ordering::Relaxed)
    }

    /// Resolves once no item of queue `name` with a sequence number below
    /// `mark` is pending or running.
    pub(crate) async fn settled_before(&self, name: &str, mark: u64) {
        loop {
            let notified = self.inner.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let oldest = self.queues().get(name).and_then(Queue::oldest_unsettled);
            if oldest.is_none_or(|seq| seq >= mark) {
                return;
            }
            notified.await;
        }
    }

    /// Returns `true` while queue `name` has pending or running items.
    pub fn is_running(&self, name: impl AsRef<str>) -> bool {
        self.get_size(name) > 0
    }

    /// Number of pending plus running items of queue `name`.
    pub fn get_size(&self, name: impl AsRef<str>) -> usize {
        self.queues().get(name.as_ref()).map_or(0, Queue::size)
    }

    /// Number of live queues in the registry.
    pub fn queue_count(&self) -> usize {
        self.queues().len()
    }

    /// Snapshot of every live queue, sorted by name.
    pub fn stats(&self) -> Vec<QueueStats> {
        let mut stats: Vec<QueueStats> = self
            .queues()
            .iter()
            .map(|(name, queue)| QueueStats {
                name: name.to_string(),
                pending: queue.pending.len(),
                running: queue.running.len(),
                parallelism: queue.parallelism,
            })
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}

impl std::fmt::Debug for QueueRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueRegistry")
            .field("id", &self.inner.id)
            .field("queues", &self.queue_count())
            .finish()
    }
}

/// A running slot of a queue, released when dropped.
///
/// Dropping also happens while unwinding from a panicking handler, which keeps
/// the running count accurate and lets the queue move on.
struct Slot {
    registry: QueueRegistry,
    name: Arc<str>,
    token_id: u64,
    seq: u64,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.registry.release(&self.name, self.token_id, self.seq);
    }
}
