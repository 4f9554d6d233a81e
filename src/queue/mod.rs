//! Named queues: per-resource serialization of asynchronous work.
//!
//! Collaborators pick one queue name per logically exclusive resource (a
//! payment id, an organization's balance recalculation, ...) and route every
//! mutation of that resource through [`QueueRegistry::schedule`]. Work on the
//! same name never runs concurrently beyond the queue's parallelism; work on
//! different names runs fully in parallel.
//!
//! ## Core types
//!
//! - [`QueueRegistry`]: the set of live queues and the dispatch loop.
//! - [`Scheduled`]: future settling with a scheduled handler's outcome.
//! - [`QueueError`]: closed outcome taxonomy (`Debounced`, `Canceled`,
//!   `Aborted`, `Failed`).
//! - [`QueueStats`]: diagnostic snapshot of a live queue.
//!
//! ## Guarantees
//!
//! - Items of one queue start in FIFO order; with parallelism above one their
//!   completion order is not guaranteed.
//! - A handler that schedules onto a queue its call chain already holds runs
//!   inline instead of waiting behind itself.
//! - The ambient context captured at schedule time is the one the handler
//!   observes, however late it runs.
//! - A failing handler only fails its own caller.

pub mod error;
mod combinators;
mod registry;
mod work;

pub use error::{Cause, ErrorKind, QueueError, QueueResult};
pub use registry::{QueueRegistry, QueueStats};
pub use work::{BoxFuture, Scheduled};

#[cfg(test)]
mod tests;
