//! Dispatch tests: ordering, filters, forwarding, retry/backoff, isolation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use chrono::Utc;
use tokio::time::Instant;

use sidechannel_core::clock::{ManualClock, SequentialIdGenerator};
use sidechannel_core::dispatch::{
    DispatchConfig, DispatchCoordinator, DispatchHandler, HandlerFailure, HandlerOutput,
    HandlerRegistry, SnapshotFilter,
};
use sidechannel_core::domain::{Advisory, MessageCategory, SidechannelError, StepSnapshot};
use sidechannel_core::store::{MessageQuery, MessageStore, SharedStore, StoreConfig};

fn shared_store() -> SharedStore {
    SharedStore::new(
        MessageStore::with_collaborators(
            StoreConfig::default(),
            Arc::new(ManualClock::new(Utc::now())),
            Arc::new(SequentialIdGenerator::new("m")),
        )
        .unwrap(),
    )
}

fn snapshot(step: u64) -> StepSnapshot {
    StepSnapshot::new("thread-a", step, Utc::now()).with_outcome("ok")
}

fn coordinator(store: &SharedStore, config: DispatchConfig) -> DispatchCoordinator {
    DispatchCoordinator::new(Arc::new(store.clone()), config)
}

fn fast_config() -> DispatchConfig {
    DispatchConfig::default().with_backoff_base(Duration::from_millis(10))
}

/// Handler that records its id into `log` and returns nothing.
fn recording(id: &'static str, priority: i32, log: &Arc<Mutex<Vec<&'static str>>>) -> DispatchHandler {
    let log = log.clone();
    DispatchHandler::new(id, priority, move |_| {
        log.lock().unwrap().push(id);
        async { Ok(HandlerOutput::none()) }
    })
}

fn failing(id: &'static str, calls: &Arc<AtomicU32>) -> DispatchHandler {
    let calls = calls.clone();
    DispatchHandler::new(id, 0, move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err::<HandlerOutput, _>(anyhow!("backend unavailable")) }
    })
}

fn failure_log() -> (Arc<Mutex<Vec<HandlerFailure>>>, impl Fn(&HandlerFailure, &StepSnapshot) + Send + Sync) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let log = log.clone();
        move |f: &HandlerFailure, _: &StepSnapshot| log.lock().unwrap().push(f.clone())
    };
    (log, sink)
}

// -------------------------------------------------------------------------
// ordering and filtering
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_handlers_run_in_priority_order() {
    let store = shared_store();
    let log = Arc::new(Mutex::new(Vec::new()));
    let handlers = vec![
        recording("ten", 10, &log),
        recording("hundred", 100, &log),
        recording("fifty", 50, &log),
    ];

    let report = coordinator(&store, fast_config())
        .dispatch(snapshot(1), &handlers)
        .await;

    assert_eq!(*log.lock().unwrap(), vec!["hundred", "fifty", "ten"]);
    assert_eq!(report.ran, vec!["hundred", "fifty", "ten"]);
    assert!(report.errors.is_empty());
}

#[tokio::test]
async fn test_equal_priority_keeps_slice_order() {
    let store = shared_store();
    let log = Arc::new(Mutex::new(Vec::new()));
    let handlers = vec![recording("b", 5, &log), recording("a", 5, &log)];

    coordinator(&store, fast_config())
        .dispatch(snapshot(1), &handlers)
        .await;
    assert_eq!(*log.lock().unwrap(), vec!["b", "a"]);
}

#[tokio::test]
async fn test_filter_skips_handler() {
    let store = shared_store();
    let log = Arc::new(Mutex::new(Vec::new()));
    let handlers = vec![
        recording("late", 10, &log).with_filter(SnapshotFilter::min_step(10)),
        recording("always", 0, &log),
    ];

    let report = coordinator(&store, fast_config())
        .dispatch(snapshot(3), &handlers)
        .await;
    assert_eq!(report.skipped, vec!["late"]);
    assert_eq!(report.ran, vec!["always"]);
    assert_eq!(*log.lock().unwrap(), vec!["always"]);
}

#[tokio::test]
async fn test_short_circuit_stops_lower_priorities() {
    let store = shared_store();
    let log = Arc::new(Mutex::new(Vec::new()));
    let stopper = {
        let log = log.clone();
        DispatchHandler::new("stopper", 100, move |_| {
            log.lock().unwrap().push("stopper");
            async { Ok(HandlerOutput::none().stop()) }
        })
    };
    let handlers = vec![recording("low", 1, &log), stopper];

    let report = coordinator(&store, fast_config())
        .dispatch(snapshot(1), &handlers)
        .await;
    assert!(report.short_circuited);
    assert_eq!(report.ran, vec!["stopper"]);
    assert_eq!(*log.lock().unwrap(), vec!["stopper"]);
}

#[tokio::test]
async fn test_dispatch_registry_uses_registration_order_on_ties() {
    let store = shared_store();
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = HandlerRegistry::new();
    registry.register(recording("first", 1, &log)).unwrap();
    registry.register(recording("top", 9, &log)).unwrap();
    registry.register(recording("second", 1, &log)).unwrap();

    coordinator(&store, fast_config())
        .dispatch_registry(snapshot(1), &registry)
        .await;
    assert_eq!(*log.lock().unwrap(), vec!["top", "first", "second"]);
}

// -------------------------------------------------------------------------
// forwarding
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_advisories_forwarded_with_snapshot_context() {
    let store = shared_store();
    let handlers = vec![
        DispatchHandler::new("linter", 0, |snap: Arc<StepSnapshot>| async move {
            Ok(HandlerOutput::none()
                .with_message(Advisory::new(
                    MessageCategory::Correction,
                    format!("fix step {}", snap.step),
                    0.8,
                ))
                .with_message(
                    Advisory::new(MessageCategory::Context, "fyi", 0.4).from_sender("librarian"),
                ))
        }),
        // Same text as the linter's first message: deduplicated.
        DispatchHandler::new("echo", -1, |snap: Arc<StepSnapshot>| async move {
            Ok(HandlerOutput::none().with_message(Advisory::new(
                MessageCategory::Correction,
                format!("fix step {}", snap.step),
                0.8,
            )))
        }),
        // Out-of-range confidence: dropped, not a handler failure.
        DispatchHandler::new("broken", -2, |_| async {
            Ok(HandlerOutput::none().with_message(Advisory::new(
                MessageCategory::Insight,
                "nonsense",
                2.0,
            )))
        }),
    ];

    let report = coordinator(&store, fast_config())
        .dispatch(snapshot(4), &handlers)
        .await;
    assert_eq!(report.messages_sent, 2);
    assert!(report.errors.is_empty());

    let messages = store.query("thread-a", &MessageQuery::all());
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].text(), "fix step 4");
    assert_eq!(messages[0].sender_id(), "linter");
    assert_eq!(messages[0].sent_at_step(), 4);
    assert_eq!(messages[1].sender_id(), "librarian");
}

// -------------------------------------------------------------------------
// retry and failure isolation
// -------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_retry_attempts_and_backoff() {
    let store = shared_store();
    let base = Duration::from_millis(500);
    let calls = Arc::new(Mutex::new(Vec::<Instant>::new()));
    let handler = {
        let calls = calls.clone();
        DispatchHandler::new("flaky", 0, move |_| {
            calls.lock().unwrap().push(Instant::now());
            async { Err::<HandlerOutput, _>(anyhow!("timeout")) }
        })
    };
    let (failures, sink) = failure_log();
    let config = DispatchConfig::default()
        .with_max_retries(2)
        .with_backoff_base(base)
        .with_error_sink(sink);

    let report = coordinator(&store, config)
        .dispatch(snapshot(1), &[handler])
        .await;

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 3);
    assert!(calls[1] - calls[0] >= base);
    assert!(calls[2] - calls[1] >= base * 2);

    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].attempts, 3);
    assert!(report.errors[0].error.contains("timeout"));
    assert_eq!(report.ran, vec!["flaky"]);

    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].handler_id, "flaky");
}

#[tokio::test(start_paused = true)]
async fn test_recovered_handler_reports_no_error() {
    let store = shared_store();
    let calls = Arc::new(AtomicU32::new(0));
    let handler = {
        let calls = calls.clone();
        DispatchHandler::new("wobbly", 0, move |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(anyhow!("transient"))
                } else {
                    Ok(HandlerOutput::none().with_message(Advisory::new(
                        MessageCategory::Insight,
                        "recovered",
                        0.6,
                    )))
                }
            }
        })
    };
    let (failures, sink) = failure_log();

    let report = coordinator(&store, fast_config().with_error_sink(sink))
        .dispatch(snapshot(1), &[handler])
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(report.errors.is_empty());
    assert_eq!(report.messages_sent, 1);
    assert!(failures.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failure_does_not_stop_other_handlers() {
    let store = shared_store();
    let calls = Arc::new(AtomicU32::new(0));
    let log = Arc::new(Mutex::new(Vec::new()));
    let handlers = vec![
        DispatchHandler::new("bad", 10, {
            let calls = calls.clone();
            move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<HandlerOutput, _>(anyhow!("nope")) }
            }
        }),
        recording("good", 1, &log),
    ];

    let report = coordinator(&store, fast_config().with_max_retries(0))
        .dispatch(snapshot(1), &handlers)
        .await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].attempts, 1);
    assert_eq!(report.ran, vec!["bad", "good"]);
    assert_eq!(*log.lock().unwrap(), vec!["good"]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_on_error() {
    let store = shared_store();
    let calls = Arc::new(AtomicU32::new(0));
    let log = Arc::new(Mutex::new(Vec::new()));
    let handlers = vec![failing("bad", &calls), recording("never", -5, &log)];

    let mut config = fast_config().with_max_retries(1);
    config.stop_on_error = true;
    let report = coordinator(&store, config)
        .dispatch(snapshot(1), &handlers)
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(report.ran, vec!["bad"]);
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_panicking_handlers_are_isolated() {
    let store = shared_store();
    let log = Arc::new(Mutex::new(Vec::new()));
    let handlers = vec![
        DispatchHandler::new("sync-panic", 30, |snap: Arc<StepSnapshot>| {
            if snap.step > 0 {
                panic!("bad snapshot");
            }
            async { Ok(HandlerOutput::none()) }
        }),
        DispatchHandler::new("async-panic", 20, |_| async {
            if true {
                panic!("exploded mid-flight");
            }
            Ok(HandlerOutput::none())
        }),
        recording("survivor", 10, &log),
    ];

    let report = coordinator(&store, fast_config().with_max_retries(0))
        .dispatch(snapshot(1), &handlers)
        .await;

    assert_eq!(report.errors.len(), 2);
    assert!(report.errors[0].error.contains("bad snapshot"));
    assert!(report.errors[1].error.contains("exploded mid-flight"));
    assert_eq!(*log.lock().unwrap(), vec!["survivor"]);
}

// -------------------------------------------------------------------------
// fire-and-forget
// -------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_spawned_dispatch_routes_failures_to_sink() {
    let store = shared_store();
    let calls = Arc::new(AtomicU32::new(0));
    let (failures, sink) = failure_log();
    let coordinator = coordinator(&store, fast_config().with_error_sink(sink));

    let handle = coordinator
        .spawn_dispatch(snapshot(2), vec![failing("bg", &calls)])
        .unwrap();
    let report = handle.await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(report.errors.len(), 1);
    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].step, 2);
    assert_eq!(failures[0].thread_id, "thread-a");
}

#[tokio::test(start_paused = true)]
async fn test_spawned_dispatch_does_not_block_caller() {
    let store = shared_store();
    let slow = DispatchHandler::new("slow", 0, |_| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(HandlerOutput::none().with_message(Advisory::new(
            MessageCategory::Warning,
            "late news",
            0.9,
        )))
    });
    let coordinator = coordinator(&store, fast_config());

    let started = Instant::now();
    let handle = coordinator.spawn_dispatch(snapshot(1), vec![slow]).unwrap();
    assert!(Instant::now() - started < Duration::from_secs(1));
    assert!(store.query("thread-a", &MessageQuery::all()).is_empty());

    let report = handle.await.unwrap();
    assert_eq!(report.messages_sent, 1);
    assert_eq!(store.query("thread-a", &MessageQuery::all()).len(), 1);
}

#[test]
fn test_spawn_without_runtime_returns_error() {
    let store = shared_store();
    let log = Arc::new(Mutex::new(Vec::new()));
    let coordinator = coordinator(&store, fast_config());

    let err = coordinator
        .spawn_dispatch(snapshot(1), vec![recording("bg", 0, &log)])
        .unwrap_err();
    assert!(matches!(err, SidechannelError::NoRuntime));
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn test_sync_caller_spawns_on_supplied_runtime() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();
    let store = shared_store();
    let note = DispatchHandler::new("bg", 0, |_| async {
        Ok(HandlerOutput::none().with_message(Advisory::new(
            MessageCategory::Insight,
            "from the background",
            0.6,
        )))
    });
    let coordinator = coordinator(&store, fast_config()).with_runtime(runtime.handle().clone());

    let handle = coordinator.spawn_dispatch(snapshot(3), vec![note]).unwrap();
    let report = runtime.block_on(handle).unwrap();

    assert_eq!(report.messages_sent, 1);
    assert_eq!(store.query("thread-a", &MessageQuery::all()).len(), 1);
}

fn broken_sink(_: &HandlerFailure, _: &StepSnapshot) {
    panic!("sink is broken");
}

#[tokio::test]
async fn test_panicking_error_sink_does_not_escape_dispatch() {
    let store = shared_store();
    let calls = Arc::new(AtomicU32::new(0));
    let log = Arc::new(Mutex::new(Vec::new()));
    let config = fast_config()
        .with_max_retries(0)
        .with_error_sink(broken_sink);

    let report = coordinator(&store, config)
        .dispatch(snapshot(1), &[failing("bad", &calls), recording("after", -1, &log)])
        .await;

    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.ran, vec!["bad", "after"]);
    assert_eq!(*log.lock().unwrap(), vec!["after"]);
}

#[tokio::test]
async fn test_metrics_count_runs_and_failures() {
    let store = shared_store();
    let calls = Arc::new(AtomicU32::new(0));
    let log = Arc::new(Mutex::new(Vec::new()));
    let coordinator = coordinator(&store, fast_config().with_max_retries(0));

    coordinator
        .dispatch(snapshot(1), &[failing("bad", &calls), recording("ok", 0, &log)])
        .await;
    assert_eq!(coordinator.metrics().handler_runs(), 2);
    assert_eq!(coordinator.metrics().handler_failures(), 1);
}
