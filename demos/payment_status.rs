//! Payment status updates serialized per payment, a debounced balance
//! recalculation, and an orderly shutdown.
//!
//! ```text
//! RUST_LOG=rqueues=debug cargo run --example payment_status
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rqueues::{QueueError, QueueRegistry, SchedulerConfig};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Clone, Copy)]
enum Status {
    Authorized,
    Captured,
    Refunded,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let registry = QueueRegistry::with_config(SchedulerConfig::from_env()?);
    let recalculations = Arc::new(AtomicU32::new(0));

    // Provider webhooks may arrive concurrently for the same payment; each
    // payment's updates are applied one at a time, in arrival order.
    let mut updates = Vec::new();
    for (payment, status) in [
        (1, Status::Authorized),
        (2, Status::Authorized),
        (1, Status::Captured),
        (1, Status::Refunded),
        (2, Status::Captured),
    ] {
        let registry_for_balance = registry.clone();
        let recalculations = Arc::clone(&recalculations);
        updates.push(registry.schedule(format!("payment-{payment}"), move |token| async move {
            token.sleep(Duration::from_millis(20)).await?;
            info!(payment, ?status, "payment status applied");

            // Many updates in a burst, one recalculation at the end. The
            // trigger runs without being awaited; failures are logged by the
            // registry and superseded triggers settle with `Debounced`.
            drop(registry_for_balance.debounce("balance", Duration::from_millis(50), move |_| async move {
                recalculations.fetch_add(1, Ordering::SeqCst);
                info!("balance recalculated");
                Ok(())
            }));
            Ok(status)
        }));
    }

    for update in updates {
        update.await?;
    }

    // A long-running sync that only stops when told to.
    let sync = registry.schedule("ledger-sync", |token| async move {
        token.sleep(Duration::from_secs(3600)).await?;
        Ok(())
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    info!(queues = ?registry.stats(), "shutting down");

    registry.abort_all(Some(QueueError::aborted_with("shutting down")));
    registry.await_all().await;

    match sync.await {
        Err(e) if e.is_aborted() => info!(reason = %e, "ledger sync stopped"),
        other => other?,
    }
    info!(
        recalculations = recalculations.load(Ordering::SeqCst),
        "all queues drained"
    );
    Ok(())
}
