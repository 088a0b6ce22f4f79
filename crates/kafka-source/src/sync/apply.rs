//! Turning one change event into one idempotent replica write.

use replica_sink::ReplicaSink;
use std::fmt;
use std::sync::Arc;
use sync_core::{normalize_temporal, ChangeEvent, DecodeError, Record, TrackedEntity};
use tracing::{debug, warn};

use super::state::SharedState;

/// Why an event was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Message without a value
    Tombstone,
    /// Not JSON, or not shaped like a change event
    Malformed,
    /// `op` missing or not one of `c`, `r`, `u`, `d`
    UnknownOperation,
    /// The image the operation needs (`after` or `before`) is absent
    MissingImage,
    /// The image has no usable primary-key value
    MissingKey,
    /// The replica rejected the write
    WriteFailed,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Tombstone => "tombstone",
            Self::Malformed => "malformed payload",
            Self::UnknownOperation => "unknown operation",
            Self::MissingImage => "missing image",
            Self::MissingKey => "missing primary key",
            Self::WriteFailed => "write failed",
        };
        f.write_str(reason)
    }
}

/// What happened to one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Upserted,
    /// Delete issued; `rows` is how many rows it matched (0 on re-delivery).
    Deleted {
        rows: u64,
    },
    Dropped(DropReason),
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        !matches!(self, Self::Dropped(_))
    }
}

/// Applies decoded change events to the replica.
///
/// Never fails: every problem is logged and reported as
/// [`ApplyOutcome::Dropped`] so the consumer moves on to the next event.
pub struct ChangeApplier<S: ?Sized> {
    sink: Arc<S>,
    state: Arc<SharedState>,
}

impl<S: ?Sized> Clone for ChangeApplier<S> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            state: Arc::clone(&self.state),
        }
    }
}

impl<S: ReplicaSink + ?Sized> ChangeApplier<S> {
    pub fn new(sink: Arc<S>, state: Arc<SharedState>) -> Self {
        Self { sink, state }
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    /// Decode and apply one raw message value.
    pub async fn apply(&self, entity: &TrackedEntity, raw: &[u8]) -> ApplyOutcome {
        match ChangeEvent::decode(raw) {
            Ok(event) => self.apply_event(entity, event).await,
            Err(e @ (DecodeError::MissingOperation | DecodeError::UnknownOperation(_))) => {
                debug!("Skipping event on {}: {e}", entity.name);
                ApplyOutcome::Dropped(DropReason::UnknownOperation)
            }
            Err(e) => {
                warn!("Dropping undecodable event on {}: {e}", entity.name);
                ApplyOutcome::Dropped(DropReason::Malformed)
            }
        }
    }

    /// Apply an already decoded event.
    pub async fn apply_event(&self, entity: &TrackedEntity, event: ChangeEvent) -> ApplyOutcome {
        let op = event.op;
        let image = if op.is_upsert() { event.after } else { event.before };
        let Some(image) = image else {
            debug!("Skipping {op} on {} without an image", entity.name);
            return ApplyOutcome::Dropped(DropReason::MissingImage);
        };

        let key = match image.get(&entity.primary_key) {
            Some(key) if !key.is_null() => key.clone(),
            _ => {
                warn!(
                    "Dropping {op} on {}: no {} in image",
                    entity.name, entity.primary_key
                );
                return ApplyOutcome::Dropped(DropReason::MissingKey);
            }
        };

        if op.is_upsert() {
            let row = self.normalize(entity, image).await;
            if let Err(e) = self.sink.upsert(entity, &row).await {
                warn!(table = %entity.name, id = %key, "Upsert failed: {e:#}");
                return ApplyOutcome::Dropped(DropReason::WriteFailed);
            }
            self.record_applied(entity, op);
            ApplyOutcome::Upserted
        } else {
            match self.sink.delete(entity, &key).await {
                Ok(rows) => {
                    self.record_applied(entity, op);
                    ApplyOutcome::Deleted { rows }
                }
                Err(e) => {
                    warn!(table = %entity.name, id = %key, "Delete failed: {e:#}");
                    ApplyOutcome::Dropped(DropReason::WriteFailed)
                }
            }
        }
    }

    /// Convert epoch numbers in the entity's temporal columns.
    async fn normalize(&self, entity: &TrackedEntity, row: Record) -> Record {
        let temporal = self
            .state
            .temporal_columns
            .get_or_load(entity, self.sink.as_ref())
            .await;
        if temporal.is_empty() {
            return row;
        }
        row.map_values(|column, value| {
            if temporal.contains(column) {
                normalize_temporal(value).into_value()
            } else {
                value
            }
        })
    }

    fn record_applied(&self, entity: &TrackedEntity, op: sync_core::Operation) {
        let total = self.state.applied.increment();
        debug!("Applied {op} on {} ({total} total)", entity.name);
    }
}
