//! Background batching: coalesce items per group, then process each group's
//! batch on its own queue.
//!
//! [`GroupedThrottledQueue`] buffers items under a group key (an organization
//! id, a tenant, ...). Buffered items are handed to the batch handler when:
//!
//! - a group reaches `max_batch_size` items (that group only),
//! - `max_delay` has elapsed since the first item was buffered (every group),
//! - or the owner flushes explicitly.
//!
//! Each group's batches run on the registry queue `"{name_prefix}{group}"`, so
//! batches of one group never overlap while different groups run in parallel.
//! A failing batch is logged and dropped; it never stops the group.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::context;
use crate::queue::{BoxFuture, QueueRegistry, QueueResult};

/// Type-erased batch handler.
pub type BatchHandler<T> = Arc<dyn Fn(String, Vec<T>) -> BoxFuture<QueueResult<()>> + Send + Sync>;

/// Tunables for a [`GroupedThrottledQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    /// Largest batch handed to the handler; a group reaching it is flushed
    /// immediately.
    pub max_batch_size: usize,
    /// How long the first buffered item may wait before every group is flushed.
    pub max_delay: Duration,
    /// Prefix of the registry queue names used for the groups.
    pub name_prefix: String,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            max_delay: Duration::from_secs(1),
            name_prefix: "batch:".to_owned(),
        }
    }
}

/// Per-group batching queue built on a [`QueueRegistry`].
///
/// # Examples
///
/// ```rust,no_run
/// use rqueues::{GroupedThrottledQueue, QueueRegistry};
///
/// #[tokio::main]
/// async fn main() {
///     let recalculations = GroupedThrottledQueue::new(QueueRegistry::new(), |org: String, ids: Vec<u64>| async move {
///         println!("recalculating {} balances of {org}", ids.len());
///         Ok(())
///     });
///
///     recalculations.add_item("org-1", 17);
///     recalculations.add_items("org-2", [4, 5]);
///     recalculations.flush_and_wait().await;
/// }
/// ```
pub struct GroupedThrottledQueue<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    registry: QueueRegistry,
    options: BatchOptions,
    handler: BatchHandler<T>,
    state: Mutex<State<T>>,
}

struct State<T> {
    buffered: HashMap<String, Vec<T>>,
    in_flight: HashMap<String, usize>,
    timer: Option<JoinHandle<()>>,
}

impl<T> Inner<T> {
    fn state(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("batch queue lock was poisoned; recovering");
            poisoned.into_inner()
        })
    }

    fn queue_name(&self, group: &str) -> String {
        format!("{}{}", self.options.name_prefix, group)
    }
}

impl<T> Clone for GroupedThrottledQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> GroupedThrottledQueue<T> {
    /// Creates a queue with [`BatchOptions::default`].
    pub fn new<F, Fut>(registry: QueueRegistry, handler: F) -> Self
    where
        F: Fn(String, Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = QueueResult<()>> + Send + 'static,
    {
        Self::with_options(registry, BatchOptions::default(), handler)
    }

    pub fn with_options<F, Fut>(registry: QueueRegistry, mut options: BatchOptions, handler: F) -> Self
    where
        F: Fn(String, Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = QueueResult<()>> + Send + 'static,
    {
        options.max_batch_size = options.max_batch_size.max(1);
        let handler: BatchHandler<T> =
            Arc::new(move |group, items| -> BoxFuture<QueueResult<()>> { Box::pin(handler(group, items)) });

        Self {
            inner: Arc::new(Inner {
                registry,
                options,
                handler,
                state: Mutex::new(State {
                    buffered: HashMap::new(),
                    in_flight: HashMap::new(),
                    timer: None,
                }),
            }),
        }
    }

    pub fn options(&self) -> &BatchOptions {
        &self.inner.options
    }

    /// Buffers one item for `group`.
    pub fn add_item(&self, group: impl Into<String>, item: T) {
        self.add_items(group, std::iter::once(item));
    }

    /// Buffers several items for `group`.
    ///
    /// Starts the `max_delay` timer if nothing was buffered before, and
    /// flushes `group` right away once it holds `max_batch_size` items.
    pub fn add_items<I>(&self, group: impl Into<String>, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        let group = group.into();
        let full = {
            let mut state = self.inner.state();
            let buffer = state.buffered.entry(group.clone()).or_default();
            buffer.extend(items);
            let buffered = buffer.len();
            if buffered == 0 {
                state.buffered.remove(&group);
                return;
            }
            if state.timer.is_none() {
                state.timer = self.start_timer();
            }
            buffered >= self.inner.options.max_batch_size
        };

        if full {
            debug!(group = %group, "batch is full; flushing early");
            self.flush_group(&group);
        }
    }

    fn start_timer(&self) -> Option<JoinHandle<()>> {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(error = %e, "no Tokio runtime; buffered items wait for an explicit flush");
                return None;
            }
        };

        let inner = Arc::downgrade(&self.inner);
        let delay = self.inner.options.max_delay;
        Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            inner.state().timer = None;
            debug!(delay = ?delay, "max delay elapsed; flushing every group");
            GroupedThrottledQueue { inner }.flush_all();
        }))
    }

    /// Hands the buffered items of `group` to the handler, in batches of at
    /// most `max_batch_size`. Unknown groups are ignored.
    pub fn flush_group(&self, group: &str) {
        let max = self.inner.options.max_batch_size;
        let batches = {
            let mut state = self.inner.state();
            let Some(mut buffer) = state.buffered.remove(group) else {
                return;
            };

            let mut batches = Vec::with_capacity(buffer.len().div_ceil(max));
            while buffer.len() > max {
                let rest = buffer.split_off(max);
                batches.push(std::mem::replace(&mut buffer, rest));
            }
            batches.push(buffer);

            *state.in_flight.entry(group.to_owned()).or_default() += batches.len();
            if state.buffered.is_empty() {
                if let Some(timer) = state.timer.take() {
                    timer.abort();
                }
            }
            batches
        };

        // Batches always queue, even when flushed from inside one of this
        // group's own batches.
        let ctx = context::current().detached();
        let queue_name = self.inner.queue_name(group);
        for batch in batches {
            let handler = Arc::clone(&self.inner.handler);
            let in_flight = InFlight {
                inner: Arc::clone(&self.inner),
                group: group.to_owned(),
            };
            let scheduled = context::sync_scope(ctx.clone(), || {
                self.inner
                    .registry
                    .schedule_with_parallelism(&queue_name, 1, move |_token| async move {
                        let in_flight = in_flight;
                        let size = batch.len();
                        if let Err(e) = handler(in_flight.group.clone(), batch).await {
                            error!(group = %in_flight.group, size, error = %e, "batch handler failed");
                        }
                        Ok(())
                    })
            });
            drop(scheduled);
        }
    }

    /// Flushes `group` and waits until its batches have been processed.
    pub async fn flush_group_and_wait(&self, group: &str) {
        self.flush_group(group);
        self.wait_for(vec![group.to_owned()]).await;
    }

    /// Flushes every buffered group.
    pub fn flush_all(&self) {
        let groups: Vec<String> = self.inner.state().buffered.keys().cloned().collect();
        for group in groups {
            self.flush_group(&group);
        }
    }

    /// Flushes every buffered group and waits until all batches are processed.
    pub async fn flush_and_wait(&self) {
        self.flush_all();
        self.wait().await;
    }

    /// Waits for the batches already handed to the handler. Buffered items
    /// are left alone.
    pub async fn wait(&self) {
        let groups: Vec<String> = self.inner.state().in_flight.keys().cloned().collect();
        self.wait_for(groups).await;
    }

    async fn wait_for(&self, groups: Vec<String>) {
        let barriers: Vec<_> = groups
            .iter()
            .map(|group| {
                self.inner
                    .registry
                    .schedule_with_parallelism(self.inner.queue_name(group), 1, |_token| async { Ok(()) })
            })
            .collect();
        for barrier in barriers {
            let _ = barrier.await;
        }
    }

    /// Groups with buffered or in-flight items, sorted.
    pub fn pending_groups(&self) -> Vec<String> {
        let state = self.inner.state();
        let groups: BTreeSet<&String> = state.buffered.keys().chain(state.in_flight.keys()).collect();
        groups.into_iter().cloned().collect()
    }
}

impl<T> fmt::Debug for GroupedThrottledQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state();
        f.debug_struct("GroupedThrottledQueue")
            .field("options", &self.inner.options)
            .field("buffered_groups", &state.buffered.len())
            .field("in_flight_groups", &state.in_flight.len())
            .finish()
    }
}

/// One batch handed to the registry, forgotten when dropped.
struct InFlight<T> {
    inner: Arc<Inner<T>>,
    group: String,
}

impl<T> Drop for InFlight<T> {
    fn drop(&mut self) {
        let mut state = self.inner.state();
        if let Some(count) = state.in_flight.get_mut(&self.group) {
            *count -= 1;
            if *count == 0 {
                state.in_flight.remove(&self.group);
            }
        }
    }
}
