use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use proptest::prelude::*;
use tokio::time::{Instant, sleep};

use super::*;
use crate::config::SchedulerConfig;
use crate::context::{self, AmbientContext};
use crate::token::CancellationToken;

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

#[derive(Clone, Debug, PartialEq)]
struct Tag(usize);

// ── Ordering and mutual exclusion ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn back_to_back_items_do_not_overlap() {
    let registry = QueueRegistry::new();
    let spans = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for i in 0..2 {
        let spans = Arc::clone(&spans);
        handles.push(registry.schedule("A", move |_| async move {
            let start = Instant::now();
            sleep(ms(10)).await;
            spans.lock().unwrap().push((i, start, Instant::now()));
            Ok(())
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let spans = spans.lock().unwrap();
    assert_eq!(spans[0].0, 0);
    assert_eq!(spans[1].0, 1);
    assert!(spans[1].1 >= spans[0].2, "second item started before the first finished");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallelism_one_is_mutually_exclusive() {
    let registry = QueueRegistry::new();
    let active = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let active = Arc::clone(&active);
            let overlaps = Arc::clone(&overlaps);
            registry.schedule("exclusive", move |_| async move {
                if active.fetch_add(1, Ordering::SeqCst) != 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                tokio::task::yield_now().await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(registry.queue_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn running_count_never_exceeds_parallelism() {
    let registry = QueueRegistry::new();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..30)
        .map(|_| {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            let observer = registry.clone();
            registry.schedule_with_parallelism("wide", 3, move |_| async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                for stats in observer.stats() {
                    assert!(stats.running <= stats.parallelism);
                }
                sleep(ms(2)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }
    assert!(peak.load(Ordering::SeqCst) <= 3);
}

#[tokio::test(start_paused = true)]
async fn freed_slot_is_reused_immediately() {
    let registry = QueueRegistry::new();
    let origin = Instant::now();
    let starts = Arc::new(Mutex::new(vec![Duration::ZERO; 4]));

    let handles: Vec<_> = [30, 10, 10, 10]
        .into_iter()
        .enumerate()
        .map(|(i, duration)| {
            let starts = Arc::clone(&starts);
            registry.schedule_with_parallelism("refill", 2, move |_| async move {
                starts.lock().unwrap()[i] = origin.elapsed();
                sleep(ms(duration)).await;
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    let starts = starts.lock().unwrap();
    assert!(starts[2] >= ms(10) && starts[2] < ms(15), "third item started at {:?}", starts[2]);
    assert!(starts[3] >= ms(20) && starts[3] < ms(25), "fourth item started at {:?}", starts[3]);
}

#[tokio::test]
async fn items_start_in_fifo_order() {
    let registry = QueueRegistry::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let order = Arc::clone(&order);
            registry.schedule("fifo", move |_| async move {
                order.lock().unwrap().push(i);
                tokio::task::yield_now().await;
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn established_parallelism_wins() {
    let registry = QueueRegistry::new();
    let first = registry.schedule_with_parallelism("p", 2, |_| async {
        sleep(ms(20)).await;
        Ok(())
    });
    let second = registry.schedule_with_parallelism("p", 5, |_| async { Ok(()) });

    let stats = registry.stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].parallelism, 2);

    first.await.unwrap();
    second.await.unwrap();
}

#[tokio::test]
async fn unrelated_queues_run_in_parallel() {
    let registry = QueueRegistry::new();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    // `blocked` only finishes once `other` has run, which would deadlock if
    // the two queues were serialized together.
    let blocked = registry.schedule("payment-1", move |_| async move {
        rx.await.map_err(|_| QueueError::msg("sender dropped"))
    });
    let other = registry.schedule("payment-2", move |_| async move {
        tx.send(()).map_err(|_| QueueError::msg("receiver dropped"))
    });

    tokio::time::timeout(Duration::from_secs(1), async {
        other.await.unwrap();
        blocked.await.unwrap();
    })
    .await
    .expect("unrelated queues blocked each other");
}

// ── Reentrancy guard ─────────────────────────────────────────────────────────

#[tokio::test]
async fn self_scheduling_runs_inline() {
    let registry = QueueRegistry::new();
    let inner = registry.clone();

    let result = tokio::time::timeout(
        Duration::from_secs(1),
        registry.schedule("A", move |_| async move {
            inner.schedule("A", |_| async { Ok("x") }).await
        }),
    )
    .await
    .expect("self-scheduling deadlocked");

    assert_eq!(result.unwrap(), "x");
}

fn nest(registry: QueueRegistry, depth: u32) -> BoxFuture<Result<u32, QueueError>> {
    Box::pin(async move {
        if depth == 0 {
            return Ok(0);
        }
        let name = if depth % 2 == 0 { "A" } else { "B" };
        let inner = registry.clone();
        registry
            .schedule(name, move |_| async move { Ok(nest(inner, depth - 1).await? + 1) })
            .await
    })
}

#[tokio::test]
async fn mutually_recursive_nesting_resolves() {
    let registry = QueueRegistry::new();
    let depth = tokio::time::timeout(Duration::from_secs(1), nest(registry.clone(), 5))
        .await
        .expect("nested scheduling deadlocked")
        .unwrap();
    assert_eq!(depth, 5);
    assert_eq!(registry.queue_count(), 0);
}

#[tokio::test]
async fn inline_work_receives_enclosing_token() {
    let registry = QueueRegistry::new();
    let inner = registry.clone();

    let (outer_id, inner_id) = registry
        .schedule("tok", move |outer: CancellationToken| async move {
            let inner_id = inner
                .schedule("tok", |token: CancellationToken| async move { Ok(token.id()) })
                .await?;
            Ok((outer.id(), inner_id))
        })
        .await
        .unwrap();

    assert_eq!(outer_id, inner_id);
}

#[tokio::test]
async fn guard_does_not_leak_across_registries() {
    let first = QueueRegistry::new();
    let second = QueueRegistry::new();
    let other = second.clone();

    let (queued, value) = first
        .schedule("A", move |_| async move {
            let nested = other.schedule("A", |_| async { Ok(7) });
            let queued = other.is_running("A");
            Ok((queued, nested.await?))
        })
        .await
        .unwrap();

    assert!(queued, "work on another registry must not run inline");
    assert_eq!(value, 7);
}

#[tokio::test]
async fn detached_trigger_starts_with_empty_guard() {
    let registry = QueueRegistry::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    let outer_log = Arc::clone(&log);
    let outer_registry = registry.clone();
    let detached = registry
        .schedule("A", move |_| async move {
            let inner_log = Arc::clone(&outer_log);
            // A plain spawn is a new external trigger: it must queue behind us.
            let handle = tokio::spawn(async move {
                outer_registry
                    .schedule("A", move |_| async move {
                        inner_log.lock().unwrap().push("inner");
                        Ok(())
                    })
                    .await
            });
            tokio::task::yield_now().await;
            outer_log.lock().unwrap().push("outer");
            Ok(handle)
        })
        .await
        .unwrap();

    detached.await.unwrap().unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["outer", "inner"]);
}

// ── Context propagation ──────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn each_item_observes_its_own_context() {
    let registry = QueueRegistry::new();

    let handles: Vec<_> = (0..40)
        .map(|i| {
            let name = format!("ctx-{}", i % 4);
            let expected = name.clone();
            context::sync_scope(AmbientContext::new().with(Tag(i)), || {
                registry.schedule(&name, move |_| async move {
                    sleep(ms((i * 7 % 13) as u64)).await;
                    tokio::task::yield_now().await;
                    let held: Vec<String> = context::current().held_queues().map(str::to_owned).collect();
                    assert_eq!(held, vec![expected]);
                    Ok(context::get::<Tag>())
                })
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap(), Some(Tag(i)));
    }
}

#[tokio::test]
async fn context_survives_waiting_in_queue() {
    let registry = QueueRegistry::new();
    let blocker = registry.schedule("slow", |_| async {
        sleep(ms(20)).await;
        Ok(None::<Tag>)
    });

    let waiting = context::scope(AmbientContext::new().with(Tag(99)), async {
        registry.schedule("slow", |_| async { Ok(context::get::<Tag>()) })
    })
    .await;

    // Scheduled from outside any scope: sees nothing.
    let bare = registry.schedule("slow", |_| async { Ok(context::get::<Tag>()) });

    assert_eq!(blocker.await.unwrap(), None);
    assert_eq!(waiting.await.unwrap(), Some(Tag(99)));
    assert_eq!(bare.await.unwrap(), None);
}

// ── Failure isolation ────────────────────────────────────────────────────────

#[tokio::test]
async fn failure_only_rejects_its_own_caller() {
    let registry = QueueRegistry::new();
    let ok1 = registry.schedule("f", |_| async { Ok(1) });
    let bad = registry.schedule("f", |_| async { Err::<i32, _>(QueueError::msg("boom")) });
    let ok2 = registry.schedule("f", |_| async { Ok(2) });

    assert_eq!(ok1.await.unwrap(), 1);
    let err = bad.await.unwrap_err();
    assert!(err.is_failed());
    assert_eq!(err.to_string(), "task failed: boom");
    assert_eq!(ok2.await.unwrap(), 2);
}

#[tokio::test]
async fn panicking_handler_releases_its_slot() {
    let registry = QueueRegistry::new();
    let panicking = registry.schedule("p", |_| async {
        if true {
            panic!("handler blew up");
        }
        Ok(())
    });
    let next = registry.schedule("p", |_| async { Ok("still running") });

    assert!(panicking.await.unwrap_err().is_failed());
    assert_eq!(next.await.unwrap(), "still running");
    assert_eq!(registry.queue_count(), 0);
}

#[test]
fn scheduling_without_runtime_fails_instead_of_hanging() {
    let registry = QueueRegistry::new();
    let scheduled = registry.schedule("orphan", |_| async { Ok(()) });
    assert_eq!(registry.queue_count(), 0);

    let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let err = runtime.block_on(scheduled).unwrap_err();
    assert!(err.is_failed());
}

// ── Cancel / abort ───────────────────────────────────────────────────────────

#[tokio::test]
async fn cancel_rejects_pending_but_not_running() {
    let registry = QueueRegistry::new();
    let running = registry.schedule("q", |_| async {
        sleep(ms(20)).await;
        Ok("done")
    });
    let pending1 = registry.schedule("q", |_| async { Ok("never") });
    let pending2 = registry.schedule("q", |_| async { Ok("never") });

    assert_eq!(registry.cancel("q", None), 2);

    assert_eq!(running.await.unwrap(), "done");
    assert!(pending1.await.unwrap_err().is_canceled());
    assert!(pending2.await.unwrap_err().is_canceled());
    assert_eq!(registry.queue_count(), 0);
}

#[tokio::test]
async fn cancel_unknown_queue_is_noop() {
    let registry = QueueRegistry::new();
    assert_eq!(registry.cancel("missing", None), 0);
    registry.abort("missing", None);
    assert_eq!(registry.queue_count(), 0);
}

#[tokio::test]
async fn cancel_with_custom_error() {
    let registry = QueueRegistry::new();
    let running = registry.schedule("q", |_| async {
        sleep(ms(5)).await;
        Ok(())
    });
    let pending = registry.schedule("q", |_| async { Ok(()) });

    registry.cancel("q", Some(QueueError::canceled_with("replaced by newer sync")));

    running.await.unwrap();
    let err = pending.await.unwrap_err();
    assert_eq!(err.to_string(), "canceled: replaced by newer sync");
}

#[tokio::test(start_paused = true)]
async fn abort_interrupts_listening_handler() {
    let registry = QueueRegistry::new();
    let fired = Arc::new(AtomicUsize::new(0));

    let listener_hits = Arc::clone(&fired);
    let listening = registry.schedule_with_parallelism("C", 2, move |token: CancellationToken| async move {
        token.on_abort(move |_| {
            listener_hits.fetch_add(1, Ordering::SeqCst);
        });
        token.sleep(Duration::from_secs(5)).await?;
        Ok(0)
    });
    let oblivious = registry.schedule_with_parallelism("C", 2, |_| async {
        sleep(ms(50)).await;
        Ok(5)
    });

    let start = Instant::now();
    sleep(ms(10)).await;
    registry.abort("C", None);
    registry.abort("C", None);

    let err = listening.await.unwrap_err();
    assert!(err.is_aborted());
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    assert_eq!(oblivious.await.unwrap(), 5);
    assert!(start.elapsed() >= ms(50));
}

#[tokio::test]
async fn abort_also_fails_pending_items() {
    let registry = QueueRegistry::new();
    let running = registry.schedule("q", |token: CancellationToken| async move {
        token.aborted().await;
        Ok(())
    });
    let pending = registry.schedule("q", |_| async { Ok(()) });

    registry.abort("q", None);

    running.await.unwrap();
    assert!(pending.await.unwrap_err().is_aborted());
}

#[tokio::test]
async fn abort_all_reaches_every_queue() {
    let registry = QueueRegistry::new();
    let handles: Vec<_> = ["emails", "payments", "sync"]
        .into_iter()
        .map(|name| {
            registry.schedule(name, |token: CancellationToken| async move {
                token.sleep(Duration::from_secs(30)).await?;
                Ok(())
            })
        })
        .collect();

    registry.abort_all(Some(QueueError::aborted_with("shutting down")));

    for handle in handles {
        let err = handle.await.unwrap_err();
        assert_eq!(err.to_string(), "aborted: shutting down");
    }
    assert_eq!(registry.queue_count(), 0);
}

// ── Debounce ─────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn debounce_coalesces_overlapping_triggers() {
    let registry = QueueRegistry::new();
    let origin = Instant::now();
    let runs = Arc::new(Mutex::new(Vec::new()));

    let first_runs = Arc::clone(&runs);
    let first = registry.debounce("B", ms(100), move |_| async move {
        first_runs.lock().unwrap().push((1, origin.elapsed()));
        Ok(1)
    });

    sleep(ms(50)).await;

    let second_runs = Arc::clone(&runs);
    let second = registry.debounce("B", ms(100), move |_| async move {
        second_runs.lock().unwrap().push((2, origin.elapsed()));
        Ok(2)
    });

    let (first, second) = tokio::join!(first, second);
    assert!(first.unwrap_err().is_debounced());
    assert_eq!(second.unwrap(), 2);

    let runs = runs.lock().unwrap();
    assert_eq!(runs.len(), 1);
    let (which, at) = runs[0];
    assert_eq!(which, 2);
    assert!(at >= ms(150) && at < ms(160), "handler ran at {at:?}");
}

#[tokio::test(start_paused = true)]
async fn single_debounce_runs_after_delay() {
    let registry = QueueRegistry::new();
    let origin = Instant::now();
    let at = registry
        .debounce("solo", ms(100), move |_| async move { Ok(origin.elapsed()) })
        .await
        .unwrap();
    assert!(at >= ms(100) && at < ms(110));
}

#[tokio::test(start_paused = true)]
async fn dropped_debounce_still_runs_its_handler() {
    let registry = QueueRegistry::new();
    let runs = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&runs);
    drop(registry.debounce("x", ms(10), move |_| async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));

    sleep(ms(100)).await;
    registry.await_all().await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(registry.queue_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn dropped_debounce_is_still_superseded() {
    let registry = QueueRegistry::new();
    let runs = Arc::new(Mutex::new(Vec::new()));

    for call in 0..3 {
        let runs = Arc::clone(&runs);
        drop(registry.debounce("x", ms(50), move |_| async move {
            runs.lock().unwrap().push(call);
            Ok(())
        }));
        sleep(ms(10)).await;
    }

    sleep(ms(200)).await;
    assert_eq!(*runs.lock().unwrap(), vec![2]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn debounce_last_call_wins(gaps in prop::collection::vec(0u64..99, 1..6)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();

        let (outcomes, runs) = runtime.block_on(async move {
            let registry = QueueRegistry::new();
            let runs = Arc::new(Mutex::new(Vec::new()));
            let mut handles = Vec::new();

            for (call, gap) in std::iter::once(0).chain(gaps.iter().copied()).enumerate() {
                sleep(ms(gap)).await;
                let runs = Arc::clone(&runs);
                let scheduled = registry.debounce("x", ms(100), move |_| async move {
                    runs.lock().unwrap().push(call);
                    Ok(call)
                });
                handles.push(tokio::spawn(scheduled));
            }

            let mut outcomes = Vec::new();
            for handle in handles {
                outcomes.push(handle.await.unwrap());
            }
            let runs = runs.lock().unwrap().clone();
            (outcomes, runs)
        });

        let last = outcomes.len() - 1;
        prop_assert_eq!(runs, vec![last]);
        for (call, outcome) in outcomes.into_iter().enumerate() {
            if call == last {
                prop_assert_eq!(outcome.unwrap(), last);
            } else {
                prop_assert!(outcome.unwrap_err().is_debounced());
            }
        }
    }
}

// ── Drain and observers ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn await_all_waits_for_everything_scheduled_before() {
    let registry = QueueRegistry::new();
    let settled = Arc::new(AtomicUsize::new(0));

    for i in 0..12u64 {
        let settled = Arc::clone(&settled);
        let name = format!("drain-{}", i % 3);
        // Results are intentionally dropped; the work still runs.
        let _ = registry.schedule(name, move |_| async move {
            sleep(ms(5 + i * 3)).await;
            settled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    registry.await_all().await;
    assert_eq!(settled.load(Ordering::SeqCst), 12);
    assert_eq!(registry.queue_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn await_all_waits_for_slow_item_on_wide_queue() {
    let registry = QueueRegistry::new();
    let settled = Arc::new(AtomicUsize::new(0));

    for duration in [100, 1] {
        let settled = Arc::clone(&settled);
        let _ = registry.schedule_with_parallelism("wide", 2, move |_| async move {
            sleep(ms(duration)).await;
            settled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    let start = Instant::now();
    registry.await_all().await;
    assert_eq!(settled.load(Ordering::SeqCst), 2);
    assert!(start.elapsed() >= ms(100));
}

#[tokio::test(start_paused = true)]
async fn await_all_ignores_items_scheduled_after_it() {
    let registry = QueueRegistry::new();
    let _ = registry.schedule_with_parallelism("wide", 2, |_| async {
        sleep(ms(10)).await;
        Ok(())
    });

    let drain = registry.await_all();
    tokio::pin!(drain);
    // Polled once so the drain has started before the late item exists.
    assert!(poll_once(drain.as_mut()).await.is_pending());

    let late = registry.schedule_with_parallelism("wide", 2, |_| async {
        sleep(ms(1_000)).await;
        Ok(())
    });

    let start = Instant::now();
    drain.await;
    assert!(start.elapsed() < ms(1_000));
    late.await.unwrap();
}

async fn poll_once<F: std::future::Future + Unpin>(mut future: F) -> std::task::Poll<F::Output> {
    std::future::poll_fn(|cx| std::task::Poll::Ready(std::pin::Pin::new(&mut future).poll(cx))).await
}

#[tokio::test(start_paused = true)]
async fn await_all_keeps_waiting_past_warning_threshold() {
    let registry = QueueRegistry::with_config(SchedulerConfig {
        drain_warning_ms: Some(50),
        ..SchedulerConfig::default()
    });
    let _ = registry.schedule("long", |_| async {
        sleep(ms(200)).await;
        Ok(())
    });

    let start = Instant::now();
    registry.await_all().await;
    assert!(start.elapsed() >= ms(200));
    assert_eq!(registry.queue_count(), 0);
}

#[tokio::test]
async fn await_all_on_empty_registry_returns() {
    let registry = QueueRegistry::with_config(SchedulerConfig::production());
    tokio::time::timeout(Duration::from_secs(1), registry.await_all())
        .await
        .expect("draining an empty registry hung");
}

#[tokio::test]
async fn await_all_from_inside_a_handler_does_not_deadlock() {
    let registry = QueueRegistry::new();
    let inner = registry.clone();
    let result = tokio::time::timeout(
        Duration::from_secs(1),
        registry.schedule("self-drain", move |_| async move {
            inner.await_all().await;
            Ok(())
        }),
    )
    .await
    .expect("await_all waited on its own queue");
    result.unwrap();
}

#[tokio::test]
async fn size_and_running_reflect_queue_state() {
    let registry = QueueRegistry::new();
    assert!(!registry.is_running("sizes"));

    let handles: Vec<_> = (0..3)
        .map(|_| {
            registry.schedule("sizes", |_| async {
                sleep(ms(5)).await;
                Ok(())
            })
        })
        .collect();

    assert!(registry.is_running("sizes"));
    assert_eq!(registry.get_size("sizes"), 3);
    assert_eq!(
        registry.stats(),
        vec![QueueStats {
            name: "sizes".to_owned(),
            pending: 2,
            running: 1,
            parallelism: 1,
        }]
    );

    for handle in handles {
        handle.await.unwrap();
    }
    assert!(!registry.is_running("sizes"));
    assert_eq!(registry.get_size("sizes"), 0);
    assert!(registry.stats().is_empty());
}

#[tokio::test]
async fn default_parallelism_comes_from_config() {
    let registry = QueueRegistry::with_config(SchedulerConfig {
        default_parallelism: 4,
        ..SchedulerConfig::default()
    });
    let handle = registry.schedule("configured", |_| async { Ok(()) });
    assert_eq!(registry.stats()[0].parallelism, 4);
    handle.await.unwrap();
}
