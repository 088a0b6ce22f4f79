//! Consumer behaviour against the in-memory broker and replica

use replica_sync_kafka_source::testing::{MemoryBroker, MemorySink};
use replica_sync_kafka_source::{
    run_entity_consumer, spawn_consumers, ChangeApplier, Error, RetryPolicy, SharedState,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use sync_core::{Record, TrackedEntity, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging for tests
fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::fixed(Duration::from_millis(10))
}

fn event(value: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&value).unwrap()
}

/// Poll `condition` every 10ms for up to 5s.
async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

#[tokio::test]
async fn test_row_written_during_bulk_copy_converges() {
    init_logging();
    let devices = TrackedEntity::new("devices", "public", "ome");
    let broker = MemoryBroker::new();
    let sink = Arc::new(MemorySink::new().with_temporal_columns("devices", ["updated_at"]));

    // The dump already saw the first version of row 7 ...
    let baseline: Record = [
        ("id", Value::from(7)),
        ("name", Value::from("db07")),
        ("updated_at", Value::from("2023-11-14T22:13:20Z")),
    ]
    .into_iter()
    .collect();
    sink.seed("devices", "id", baseline);

    // ... and the change stream, bookmarked before the dump, carries it too.
    broker.publish(
        &devices.topic,
        event(json!({"payload": {"op": "c", "before": null,
            "after": {"id": 7, "name": "db07", "updated_at": 1_700_000_000_000_000i64}}})),
    );
    broker.publish(
        &devices.topic,
        event(json!({"payload": {"op": "u", "before": null,
            "after": {"id": 7, "name": "db07-renamed", "updated_at": 1_700_000_060_000_000i64}}})),
    );

    let state = SharedState::new();
    let applier = ChangeApplier::new(Arc::clone(&sink), Arc::clone(&state));
    let handles = spawn_consumers(
        std::slice::from_ref(&devices),
        Arc::new(broker.clone()),
        applier,
        fast_retry(),
    );

    wait_until("both events applied", || state.applied.get() == 2).await;

    assert_eq!(sink.row_count("devices"), 1);
    let row = sink.row("devices", &Value::from(7)).unwrap();
    assert_eq!(row.get("name"), Some(&Value::from("db07-renamed")));
    assert_eq!(
        row.get("updated_at"),
        Some(&Value::from("2023-11-14T22:14:20.000000Z"))
    );

    for handle in handles {
        handle.abort();
    }
}

#[tokio::test]
async fn test_broken_topic_does_not_stall_other_entities() {
    init_logging();
    let devices = TrackedEntity::new("devices", "public", "ome");
    let alerts = TrackedEntity::new("alerts", "public", "ome");
    let broker = MemoryBroker::new();
    let sink = Arc::new(MemorySink::new());

    broker.break_topic(&devices.topic);
    for id in 1..=3 {
        broker.publish(&alerts.topic, event(json!({"op": "c", "after": {"id": id}})));
    }

    let state = SharedState::new();
    let handles = spawn_consumers(
        &[devices.clone(), alerts.clone()],
        Arc::new(broker.clone()),
        ChangeApplier::new(Arc::clone(&sink), Arc::clone(&state)),
        fast_retry(),
    );

    wait_until("alerts applied", || sink.row_count("alerts") == 3).await;
    wait_until("devices reader reopened", || broker.opens(&devices.topic) >= 3).await;

    // Events keep flowing while the other consumer is still retrying.
    broker.publish(&alerts.topic, event(json!({"op": "d", "before": {"id": 2}})));
    wait_until("delete applied", || sink.row_count("alerts") == 2).await;
    assert_eq!(sink.row_count("devices"), 0);

    for handle in handles {
        assert!(!handle.is_finished());
        handle.abort();
    }
}

#[tokio::test]
async fn test_reconnect_replays_from_earliest() {
    init_logging();
    let devices = TrackedEntity::new("devices", "public", "ome");
    let broker = MemoryBroker::new();
    let sink = Arc::new(MemorySink::new());
    let state = SharedState::new();

    broker.publish(&devices.topic, event(json!({"op": "c", "after": {"id": 1, "name": "a"}})));
    let handles = spawn_consumers(
        std::slice::from_ref(&devices),
        Arc::new(broker.clone()),
        ChangeApplier::new(Arc::clone(&sink), Arc::clone(&state)),
        fast_retry(),
    );
    wait_until("first event applied", || state.applied.get() == 1).await;

    broker.interrupt(&devices.topic, 1);
    broker.publish(&devices.topic, event(json!({"op": "u", "after": {"id": 1, "name": "b"}})));

    // The replayed create and the new update are both applied again.
    wait_until("replay applied", || state.applied.get() >= 3).await;
    assert_eq!(broker.opens(&devices.topic), 2);
    assert_eq!(sink.row_count("devices"), 1);
    assert_eq!(
        sink.row("devices", &Value::from(1)).unwrap().get("name"),
        Some(&Value::from("b"))
    );

    for handle in handles {
        handle.abort();
    }
}

#[tokio::test]
async fn test_malformed_and_tombstone_messages_are_skipped() {
    init_logging();
    let devices = TrackedEntity::new("devices", "public", "ome");
    let broker = MemoryBroker::new();
    let sink = Arc::new(MemorySink::new());
    let state = SharedState::new();

    broker.publish(&devices.topic, b"{not json");
    broker.publish_tombstone(&devices.topic);
    broker.publish(&devices.topic, event(json!({"op": "c", "after": {"id": 9}})));

    let handles = spawn_consumers(
        std::slice::from_ref(&devices),
        Arc::new(broker.clone()),
        ChangeApplier::new(Arc::clone(&sink), Arc::clone(&state)),
        fast_retry(),
    );
    wait_until("valid event applied", || sink.row_count("devices") == 1).await;
    assert_eq!(state.applied.get(), 1);
    assert_eq!(broker.opens(&devices.topic), 1);

    for handle in handles {
        handle.abort();
    }
}

#[tokio::test]
async fn test_retry_budget_exhausted() {
    init_logging();
    let devices = TrackedEntity::new("devices", "public", "ome");
    let broker = MemoryBroker::new();
    broker.break_topic(&devices.topic);

    let result = run_entity_consumer(
        devices.clone(),
        Arc::new(broker.clone()),
        ChangeApplier::new(Arc::new(MemorySink::new()), SharedState::new()),
        fast_retry().with_max_attempts(2),
    )
    .await;

    match result {
        Err(Error::RetriesExhausted { topic, failures }) => {
            assert_eq!(topic, "ome.public.devices");
            assert_eq!(failures, 3);
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(broker.opens(&devices.topic), 3);
}
