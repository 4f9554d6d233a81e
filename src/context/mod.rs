//! Ambient execution context, call-chain-scoped state that survives being
//! queued.
//!
//! An [`AmbientContext`] travels with a logical call chain through a Tokio
//! task-local. The scheduler snapshots it when work is scheduled and restores
//! that exact snapshot around the handler when the work finally runs, however
//! much later that is.
//!
//! It carries two things:
//!
//! - a type-erased map of caller values (a request id, the acting user, ...);
//! - the reentrancy guard: the queues the current chain already holds, used by
//!   the scheduler to run nested work inline instead of deadlocking.
//!
//! # Examples
//!
//! ```
//! use rqueues::context::{self, AmbientContext};
//!
//! #[derive(Clone, Debug, PartialEq)]
//! struct RequestId(u64);
//!
//! # block_on(async {
//! let ctx = AmbientContext::new().with(RequestId(7));
//! context::scope(ctx, async {
//!     assert_eq!(context::get::<RequestId>(), Some(RequestId(7)));
//! })
//! .await;
//! assert_eq!(context::get::<RequestId>(), None);
//! # });
//! # fn block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    future::Future,
    sync::Arc,
};

use tokio::task::{JoinHandle, futures::TaskLocalFuture};

use crate::token::CancellationToken;

tokio::task_local! {
    static AMBIENT: AmbientContext;
}

/// Type-erased map of ambient values, keyed by type.
///
/// Values are reference-counted so that snapshotting a context is cheap;
/// inserting into a snapshot never affects the context it was taken from.
#[derive(Clone, Default)]
pub struct Extensions {
    map: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Create a new empty extensions map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any previous value of the same type
    pub fn insert<T>(&mut self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.map.insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Get a value from the extensions map
    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Remove a value, returning whether one was present
    pub fn remove<T>(&mut self) -> bool
    where
        T: Send + Sync + 'static,
    {
        self.map.remove(&TypeId::of::<T>()).is_some()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.map.len())
            .finish()
    }
}

/// One entry of the reentrancy guard: a queue held by an ancestor frame.
#[derive(Clone, Debug)]
pub(crate) struct HeldQueue {
    pub(crate) registry: u64,
    pub(crate) name: Arc<str>,
    pub(crate) token: CancellationToken,
}

/// Snapshot of a call chain's ambient state.
#[derive(Clone, Debug, Default)]
pub struct AmbientContext {
    extensions: Extensions,
    held: Vec<HeldQueue>,
}

impl AmbientContext {
    /// An empty context, as seen by a brand-new external trigger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert of an ambient value.
    #[must_use]
    pub fn with<T>(mut self, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.extensions.insert(value);
        self
    }

    pub fn insert<T>(&mut self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.extensions.insert(value);
    }

    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.extensions.get::<T>()
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Names of the queues this call chain currently holds, outermost first.
    pub fn held_queues(&self) -> impl Iterator<Item = &str> {
        self.held.iter().map(|held| held.name.as_ref())
    }

    /// Token of the innermost frame holding `name` in `registry`, if any.
    pub(crate) fn held_token(&self, registry: u64, name: &str) -> Option<CancellationToken> {
        self.held
            .iter()
            .rev()
            .find(|held| held.registry == registry && held.name.as_ref() == name)
            .map(|held| held.token.clone())
    }

    /// Copy of this context with the ambient values kept and the guard stack
    /// emptied, as if the work had been triggered from outside.
    pub(crate) fn detached(&self) -> Self {
        Self {
            extensions: self.extensions.clone(),
            held: Vec::new(),
        }
    }

    /// Copy of this context with one more queue pushed on the guard stack.
    pub(crate) fn holding(&self, held: HeldQueue) -> Self {
        let mut next = self.clone();
        next.held.push(held);
        next
    }
}

/// Snapshot of the current task's ambient context.
///
/// Outside of any scope this is an empty context.
pub fn current() -> AmbientContext {
    AMBIENT.try_with(Clone::clone).unwrap_or_default()
}

/// Clones an ambient value out of the current context.
pub fn get<T>() -> Option<T>
where
    T: Clone + Send + Sync + 'static,
{
    AMBIENT
        .try_with(|ctx| ctx.get::<T>().cloned())
        .ok()
        .flatten()
}

/// Runs `future` with `ctx` installed as its ambient context.
pub fn scope<F>(ctx: AmbientContext, future: F) -> TaskLocalFuture<AmbientContext, F>
where
    F: Future,
{
    AMBIENT.scope(ctx, future)
}

/// Runs a synchronous closure with `ctx` installed as the ambient context.
pub fn sync_scope<R>(ctx: AmbientContext, f: impl FnOnce() -> R) -> R {
    AMBIENT.sync_scope(ctx, f)
}

/// Spawns a Tokio task that inherits the caller's ambient context.
///
/// Plain `tokio::spawn` starts the new task with an empty context; use this
/// when detached work must keep the caller's values and reentrancy guard.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(scope(current(), future))
}
