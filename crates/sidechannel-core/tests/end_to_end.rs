//! Driving-loop scenarios across store, retention, and dispatch.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use sidechannel_core::clock::{ManualClock, SequentialIdGenerator};
use sidechannel_core::collaborators::ContentFormatter;
use sidechannel_core::dispatch::{DispatchCoordinator, DispatchHandler, HandlerOutput, SnapshotFilter};
use sidechannel_core::domain::{Advisory, Message, MessageCategory, NewMessage, StepSnapshot};
use sidechannel_core::metrics::Metrics;
use sidechannel_core::retention::{RetentionEngine, RetentionPolicy};
use sidechannel_core::store::{MessageQuery, MessageStore, SharedStore, StoreConfig};
use sidechannel_core::SidechannelConfig;

struct Bullets;

impl ContentFormatter for Bullets {
    fn format(&self, messages: &[Message]) -> String {
        messages
            .iter()
            .map(|m| format!("- [{}] {}", m.category(), m.text()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn store_with(config: StoreConfig, metrics: Arc<Metrics>) -> MessageStore {
    MessageStore::with_collaborators(
        config,
        Arc::new(ManualClock::new(Utc::now())),
        Arc::new(SequentialIdGenerator::new("m")),
    )
    .unwrap()
    .with_metrics(metrics)
}

#[test]
fn test_ttl_sweep_keeps_latest_two() {
    let mut store = store_with(StoreConfig::default(), Arc::new(Metrics::new()));
    for step in 1..=5 {
        store
            .send(
                NewMessage::new("t", "observer", step, MessageCategory::Insight, format!("s{step}"))
                    .with_ttl(3),
            )
            .unwrap();
    }

    let report = store.gc("t", 6);
    assert_eq!(report.expired, 3);
    let remaining: Vec<u64> = {
        let mut steps: Vec<u64> = store
            .query("t", &MessageQuery::all())
            .iter()
            .map(Message::sent_at_step)
            .collect();
        steps.sort();
        steps
    };
    assert_eq!(remaining, vec![4, 5]);
}

#[tokio::test(start_paused = true)]
async fn test_observer_loop() {
    let metrics = Arc::new(Metrics::new());
    let store = SharedStore::new(store_with(
        StoreConfig {
            default_ttl_steps: 3,
            ..StoreConfig::default()
        },
        metrics.clone(),
    ));
    let coordinator = DispatchCoordinator::new(
        Arc::new(store.clone()),
        sidechannel_core::DispatchConfig::default().with_backoff_base(Duration::from_millis(5)),
    )
    .with_metrics(metrics.clone());

    let handlers = vec![
        DispatchHandler::new("error-watch", 10, |snap: Arc<StepSnapshot>| async move {
            Ok(HandlerOutput::none().with_message(Advisory::new(
                MessageCategory::Warning,
                format!("step {} reported an error", snap.step),
                0.9,
            )))
        })
        .with_filter(SnapshotFilter::outcome_contains("error")),
        DispatchHandler::new("pacer", 0, |_| async {
            Ok(HandlerOutput::none().with_message(Advisory::new(
                MessageCategory::Context,
                "keep steps small",
                0.3,
            )))
        }),
    ];
    let retention = RetentionEngine::new(
        [RetentionPolicy::for_category(MessageCategory::Context).with_max_count(1)],
        None,
    )
    .unwrap();

    let outcomes = ["ok", "error: missing file", "ok", "ok"];
    let mut rendered = Vec::new();
    for (i, outcome) in outcomes.iter().enumerate() {
        let step = i as u64 + 1;

        let pending = store.query("t", &MessageQuery::pending_at(step));
        let kept = retention.apply(&pending).keep;
        rendered.push(Bullets.format(&kept));
        let used: Vec<String> = kept.iter().map(|m| m.id().to_string()).collect();
        store.mark_incorporated(&used, step);

        let snap = StepSnapshot::new("t", step, Utc::now())
            .with_outcome(*outcome)
            .with_incorporated(used);
        store.store_snapshot(snap.clone());
        coordinator.dispatch(snap, &handlers).await;
        store.gc("t", step);
    }

    assert_eq!(rendered[0], "");
    assert_eq!(rendered[1], "- [context] keep steps small");
    assert!(rendered[2].contains("step 2 reported an error"));
    assert_eq!(store.snapshots("t").len(), 4);
    // "keep steps small" repeats within the dedupe window and is rejected.
    assert_eq!(metrics.messages_accepted(), 2);
    assert!(metrics.messages_deduplicated() >= 3);
    assert_eq!(metrics.handler_runs(), 5);
    assert_eq!(metrics.handler_failures(), 0);
}

#[test]
fn test_config_builds_components() {
    let cfg = SidechannelConfig::from_toml_str(
        r#"
        [store]
        max_per_thread = 2

        [[retention.policies]]
        category = "insight"
        max_count = 1
        "#,
    )
    .unwrap();
    cfg.validate().unwrap();

    let mut store = store_with(cfg.store.clone(), Arc::new(Metrics::new()));
    for step in 1..=3 {
        store
            .send(NewMessage::new("t", "o", step, MessageCategory::Insight, format!("n{step}")))
            .unwrap();
    }
    assert_eq!(store.len("t"), 2);

    let engine = cfg.retention.build().unwrap();
    let out = engine.apply(&store.query("t", &MessageQuery::all()));
    assert_eq!(out.keep.len(), 1);
    assert_eq!(cfg.dispatch.to_config().max_retries, 2);
}
