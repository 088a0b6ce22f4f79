//! Per-entity change consumers.
//!
//! Each tracked entity gets its own long-running task reading that entity's
//! topic from the earliest retained offset and applying every event in
//! order. Nothing is committed: after a read failure the reader is dropped
//! and reopened at the beginning, and idempotent application absorbs the
//! replay.

use replica_sink::ReplicaSink;
use std::sync::Arc;
use sync_core::TrackedEntity;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::apply::{ApplyOutcome, ChangeApplier, DropReason};
use crate::consumer::{EventReader, ReaderFactory};
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Read and apply `entity`'s change stream until the retry budget runs out.
///
/// With an unbounded [`RetryPolicy`] this only returns when the task is
/// aborted.
pub async fn run_entity_consumer<F, S>(
    entity: TrackedEntity,
    factory: Arc<F>,
    applier: ChangeApplier<S>,
    retry: RetryPolicy,
) -> Result<()>
where
    F: ReaderFactory,
    S: ReplicaSink + ?Sized,
{
    info!("Starting consumer for {} on topic {}", entity.name, entity.topic);
    let mut failures: u32 = 0;

    loop {
        let failure = match factory.open(&entity).await {
            Ok(mut reader) => {
                debug!("Opened reader for {}", entity.topic);
                consume(&entity, &mut reader, &applier, &mut failures).await
            }
            Err(e) => e,
        };

        failures = failures.saturating_add(1);
        if !retry.allows(failures) {
            error!(
                "Giving up on {} after {failures} consecutive failures: {failure}",
                entity.topic
            );
            return Err(Error::RetriesExhausted {
                topic: entity.topic.clone(),
                failures,
            });
        }

        let delay = retry.delay_for(failures);
        warn!(
            "Read from {} failed ({failure}), reopening from the earliest offset in {delay:?}",
            entity.topic
        );
        sleep(delay).await;
    }
}

/// Apply messages until the reader fails, returning the failure.
async fn consume<R, S>(
    entity: &TrackedEntity,
    reader: &mut R,
    applier: &ChangeApplier<S>,
    failures: &mut u32,
) -> Error
where
    R: EventReader,
    S: ReplicaSink + ?Sized,
{
    loop {
        let message = match reader.next_message().await {
            Ok(message) => message,
            Err(e) => return e,
        };
        *failures = 0;

        let outcome = match &message.payload {
            Some(payload) => applier.apply(entity, payload).await,
            None => ApplyOutcome::Dropped(DropReason::Tombstone),
        };
        if let ApplyOutcome::Dropped(reason) = outcome {
            debug!(
                "Dropped {}[{}]@{}: {reason}",
                message.topic, message.partition, message.offset
            );
        }
    }
}

/// Spawn one consumer task per entity.
pub fn spawn_consumers<F, S>(
    entities: &[TrackedEntity],
    factory: Arc<F>,
    applier: ChangeApplier<S>,
    retry: RetryPolicy,
) -> Vec<JoinHandle<Result<()>>>
where
    F: ReaderFactory,
    S: ReplicaSink + ?Sized + 'static,
{
    info!("Spawning {} change consumers", entities.len());
    entities
        .iter()
        .cloned()
        .map(|entity| {
            tokio::spawn(run_entity_consumer(
                entity,
                Arc::clone(&factory),
                applier.clone(),
                retry.clone(),
            ))
        })
        .collect()
}
