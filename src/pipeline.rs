//! Orchestration of the migration: readiness, bootstrap, connector,
//! consumers and the supervising loop.

use anyhow::{Context, Result};
use checkpoint::FilesystemStore;
use replica_sync_kafka_source::{
    spawn_consumers, ChangeApplier, ConsumerConfig, KafkaReaderFactory, RetryPolicy, SharedState,
};
use replica_sync_postgresql::{
    BootstrapReport, BootstrapSequencer, PgBookmarkManager, PgDumpTransfer, PgEndpoint,
    PostgresSink, ReplicationBookmark,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use sync_core::TrackedEntity;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::connector::{self, ConnectClient, ConnectorSettings, RUNNING_BUDGET};
use crate::readiness::{self, wait_until_ready};
use crate::verify::{self, ReconciliationReport};
use crate::{BootstrapOpts, ConnectOpts, KafkaOpts, ReplicaOpts, SourceOpts};

pub type ConsumerHandle = JoinHandle<replica_sync_kafka_source::Result<()>>;

fn source_endpoint(source: &SourceOpts) -> Result<PgEndpoint> {
    PgEndpoint::parse(&source.source_connection_string).context("Invalid source connection string")
}

fn replica_endpoint(replica: &ReplicaOpts) -> Result<PgEndpoint> {
    PgEndpoint::parse(&replica.replica_connection_string)
        .context("Invalid replica connection string")
}

/// Wait for the source (with data), the replica server and the broker.
pub async fn wait_for_services(
    source: &SourceOpts,
    replica: &ReplicaOpts,
    schema: &str,
    kafka: &KafkaOpts,
) -> Result<()> {
    let source_db = source_endpoint(source)?;
    wait_until_ready("Source database", readiness::SOURCE_BUDGET, || {
        readiness::source_ready(&source_db, schema, &source.source_probe_table)
    })
    .await?;

    let replica_db = replica_endpoint(replica)?;
    wait_until_ready("Replica database", readiness::REPLICA_BUDGET, || {
        readiness::replica_ready(&replica_db)
    })
    .await?;

    wait_until_ready("Kafka", readiness::KAFKA_BUDGET, || {
        readiness::kafka_ready(&kafka.kafka_brokers)
    })
    .await?;
    Ok(())
}

/// Bookmark the source's change log, then copy it into the replica.
pub async fn bootstrap(
    source: &SourceOpts,
    replica: &ReplicaOpts,
    opts: &BootstrapOpts,
) -> Result<BootstrapReport<ReplicationBookmark>> {
    let source_db = source_endpoint(source)?;
    let client = source_db
        .connect()
        .await
        .context("Failed to connect to the source for the bookmark")?;

    let bookmarks = PgBookmarkManager::new(client, &source.slot_name, &source.plugin);
    let transfer = PgDumpTransfer::new(source_db, replica_endpoint(replica)?, &opts.dump_path)
        .recreate_replica(!opts.keep_replica_database);
    let sequencer = BootstrapSequencer::new(bookmarks, transfer)
        .with_checkpoints(FilesystemStore::new(&opts.checkpoint_dir));

    let report = sequencer.run().await?;
    info!("Bootstrap complete");
    info!("  Slot LSN:  {}", report.bookmark.lsn);
    info!("  Dump:      {:?}", report.export_duration);
    info!("  Restore:   {:?}", report.import_duration);
    Ok(report)
}

/// Deploy the Debezium connector and wait for it to run.
pub async fn deploy_connector(
    source: &SourceOpts,
    connect: &ConnectOpts,
    entities: &[TrackedEntity],
    topic_prefix: &str,
) -> Result<()> {
    let client = ConnectClient::new(&connect.connect_url)?;
    wait_until_ready("Kafka Connect", readiness::CONNECT_BUDGET, || {
        readiness::connect_ready(client.http(), client.base_url())
    })
    .await?;

    let settings = ConnectorSettings::for_source(
        &connect.connector_name,
        &source_endpoint(source)?,
        connect.connector_database_host.as_deref(),
        topic_prefix,
        &source.slot_name,
        &source.plugin,
        &connect.publication_name,
    )?;
    client
        .deploy(&connector::connector_config(&settings, entities))
        .await?;
    client
        .wait_until_running(&connect.connector_name, RUNNING_BUDGET)
        .await
}

/// Connect to the replica and spawn one consumer per entity.
pub async fn start_consumers(
    replica: &ReplicaOpts,
    kafka: &KafkaOpts,
    entities: &[TrackedEntity],
    retry: RetryPolicy,
) -> Result<(Arc<SharedState>, Vec<ConsumerHandle>)> {
    let sink = PostgresSink::connect(replica_endpoint(replica)?)
        .await
        .context("Failed to connect to the replica")?;

    let state = SharedState::new();
    let applier = ChangeApplier::new(Arc::new(sink), Arc::clone(&state));
    let factory = Arc::new(KafkaReaderFactory::new(ConsumerConfig {
        brokers: kafka.kafka_brokers.clone(),
        ..Default::default()
    }));

    let handles = spawn_consumers(entities, factory, applier, retry);
    info!("Started {} consumers", handles.len());
    Ok((state, handles))
}

/// Compare source and replica.
pub async fn reconcile(
    source: &SourceOpts,
    replica: &ReplicaOpts,
    entities: &[TrackedEntity],
    sample_size: i64,
) -> Result<ReconciliationReport> {
    let source_client = source_endpoint(source)?
        .connect()
        .await
        .context("Failed to connect to the source")?;
    let replica_client = replica_endpoint(replica)?
        .connect()
        .await
        .context("Failed to connect to the replica")?;

    let report = verify::reconcile(&source_client, &replica_client, entities, sample_size).await;
    report.log();
    Ok(report)
}

/// Await and log every worker that has finished.
async fn reap_finished(workers: &mut Vec<ConsumerHandle>) {
    let mut i = 0;
    while i < workers.len() {
        if !workers[i].is_finished() {
            i += 1;
            continue;
        }
        match workers.swap_remove(i).await {
            Ok(Ok(())) => info!("Change consumer finished"),
            Ok(Err(e)) => error!("Change consumer stopped: {e}"),
            Err(e) => error!("Change consumer task failed: {e}"),
        }
    }
}

/// Log the applied count every `report_interval` until `shutdown` resolves
/// or every worker has stopped, then abort the workers.
///
/// Returns the final applied count. `report_interval` must be non-zero.
pub async fn supervise<F>(
    state: &SharedState,
    mut workers: Vec<ConsumerHandle>,
    report_interval: Duration,
    shutdown: F,
) -> u64
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(report_interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                info!("Change events applied: {}", state.applied.get());
                reap_finished(&mut workers).await;
                if workers.is_empty() {
                    warn!("All change consumers have stopped");
                    break;
                }
            }
        }
    }

    for worker in &workers {
        worker.abort();
    }
    let applied = state.applied.get();
    info!("Change events applied: {applied} (final)");
    applied
}

/// Resolves on Ctrl-C. A failure to install the handler is logged and
/// leaves the future pending.
pub async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}
