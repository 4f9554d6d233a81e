//! # rqueues
//!
//! In-process named-queue scheduler for Tokio. Work scheduled under the same
//! name is serialized (or bounded by a per-queue parallelism); work under
//! different names runs in parallel.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use rqueues::{QueueError, QueueRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), QueueError> {
//!     let registry = QueueRegistry::new();
//!
//!     // Serialized per payment.
//!     let status = registry
//!         .schedule("payment-42", |_token| async { Ok("settled") })
//!         .await?;
//!     println!("payment-42 is {status}");
//!
//!     // Coalesce a burst of triggers into one run of the latest handler.
//!     match registry
//!         .debounce("org-7:recalculate", Duration::from_millis(100), |token| async move {
//!             token.check()?;
//!             Ok(())
//!         })
//!         .await
//!     {
//!         Err(e) if e.is_debounced() => {}
//!         other => other?,
//!     }
//!
//!     // Shutdown: stop everything cooperatively, then drain.
//!     registry.abort_all(Some(QueueError::aborted_with("shutting down")));
//!     registry.await_all().await;
//!     Ok(())
//! }
//! ```

pub mod background;
pub mod config;
pub mod context;
pub mod queue;
pub mod token;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use background::{BatchOptions, GroupedThrottledQueue};
pub use config::{ConfigError, SchedulerConfig};
pub use context::AmbientContext;
pub use queue::{ErrorKind, QueueError, QueueRegistry, QueueResult, QueueStats, Scheduled};
pub use token::CancellationToken;
