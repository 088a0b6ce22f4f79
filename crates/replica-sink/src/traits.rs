//! ReplicaSink trait definition.

use anyhow::Result;
use std::collections::HashSet;
use sync_core::{Record, TrackedEntity, Value};

/// Trait for writing change events to the replica.
///
/// Every write is a single, independent, autocommit statement. Both writes
/// must be idempotent: applying the same row twice, or deleting an already
/// absent key, leaves the replica in the same state as applying it once.
///
/// # Usage Pattern
///
/// Consumer code uses generics for zero-cost dispatch:
///
/// ```ignore
/// pub async fn run_entity_consumer<S: ReplicaSink>(
///     sink: Arc<S>,
///     entity: TrackedEntity,
/// ) -> Result<()> {
///     sink.upsert(&entity, &row).await?;
/// }
/// ```
#[async_trait::async_trait]
pub trait ReplicaSink: Send + Sync {
    /// Insert `row`, or on primary-key conflict overwrite every non-key
    /// column present in `row` with the new values.
    async fn upsert(&self, entity: &TrackedEntity, row: &Record) -> Result<()>;

    /// Delete the row whose primary key equals `key`.
    ///
    /// Returns the number of rows removed (0 when already deleted).
    async fn delete(&self, entity: &TrackedEntity, key: &Value) -> Result<u64>;

    /// Read the replica catalog for the names of `entity`'s temporal columns
    /// (timestamp, timestamptz, date).
    ///
    /// Implementations query on every call; memoization is the caller's job.
    async fn temporal_columns(&self, entity: &TrackedEntity) -> Result<HashSet<String>>;
}
