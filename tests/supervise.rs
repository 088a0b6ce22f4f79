//! Supervisor behaviour over in-memory consumers

use replica_sync::pipeline::supervise;
use replica_sync_kafka_source::testing::{MemoryBroker, MemorySink};
use replica_sync_kafka_source::{spawn_consumers, ChangeApplier, RetryPolicy, SharedState};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use sync_core::TrackedEntity;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

fn event(value: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&value).unwrap()
}

#[tokio::test]
async fn test_shutdown_returns_final_count() {
    init_logging();
    let devices = TrackedEntity::new("devices", "public", "ome");
    let alerts = TrackedEntity::new("alerts", "public", "ome");
    let broker = MemoryBroker::new();
    broker.publish(&devices.topic, event(json!({"op": "c", "after": {"id": 1}})));
    broker.publish(&devices.topic, event(json!({"op": "u", "after": {"id": 1, "name": "db01"}})));
    broker.publish(&alerts.topic, event(json!({"payload": {"op": "c", "after": {"id": 4}}})));

    let sink = Arc::new(MemorySink::new());
    let state = SharedState::new();
    let workers = spawn_consumers(
        &[devices, alerts],
        Arc::new(broker.clone()),
        ChangeApplier::new(Arc::clone(&sink), Arc::clone(&state)),
        RetryPolicy::fixed(Duration::from_millis(10)),
    );

    let watched = Arc::clone(&state);
    let all_applied = async move {
        while watched.applied.get() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };

    let applied = tokio::time::timeout(
        Duration::from_secs(5),
        supervise(&state, workers, Duration::from_millis(20), all_applied),
    )
    .await
    .expect("supervisor did not stop");

    assert_eq!(applied, 3);
    assert_eq!(sink.row_count("devices"), 1);
    assert_eq!(sink.row_count("alerts"), 1);
}

#[tokio::test]
async fn test_stops_when_every_consumer_gave_up() {
    init_logging();
    let devices = TrackedEntity::new("devices", "public", "ome");
    let broker = MemoryBroker::new();
    broker.break_topic(&devices.topic);

    let state = SharedState::new();
    let workers = spawn_consumers(
        std::slice::from_ref(&devices),
        Arc::new(broker.clone()),
        ChangeApplier::new(Arc::new(MemorySink::new()), Arc::clone(&state)),
        RetryPolicy::fixed(Duration::from_millis(1)).with_max_attempts(2),
    );

    let applied = tokio::time::timeout(
        Duration::from_secs(5),
        supervise(
            &state,
            workers,
            Duration::from_millis(10),
            std::future::pending::<()>(),
        ),
    )
    .await
    .expect("supervisor kept running without consumers");

    assert_eq!(applied, 0);
    assert_eq!(broker.opens(&devices.topic), 3);
}
