//! State shared by all entity consumers.

use replica_sink::ReplicaSink;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use sync_core::TrackedEntity;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Process-wide count of applied writes. Only ever grows.
#[derive(Debug, Default)]
pub struct AppliedCounter(AtomicU64);

impl AppliedCounter {
    /// Record one applied write, returning the new total.
    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Temporal column names per entity, read from the replica catalog once and
/// kept for the life of the process.
#[derive(Debug, Default)]
pub struct TemporalColumnCache {
    entries: Mutex<HashMap<String, Arc<HashSet<String>>>>,
}

impl TemporalColumnCache {
    /// Return the entity's temporal columns, querying `sink` on first use.
    ///
    /// The lock is held while loading, so consumers racing on a cold entry
    /// issue a single catalog query. A failed query caches the empty set.
    pub async fn get_or_load<S>(&self, entity: &TrackedEntity, sink: &S) -> Arc<HashSet<String>>
    where
        S: ReplicaSink + ?Sized,
    {
        let key = entity.qualified_name();
        let mut entries = self.entries.lock().await;
        if let Some(columns) = entries.get(&key) {
            return Arc::clone(columns);
        }

        let columns = match sink.temporal_columns(entity).await {
            Ok(columns) => {
                debug!("Temporal columns of {key}: {columns:?}");
                columns
            }
            Err(e) => {
                warn!("Failed to read temporal columns of {key}, converting none: {e:#}");
                HashSet::new()
            }
        };
        let columns = Arc::new(columns);
        entries.insert(key, Arc::clone(&columns));
        columns
    }

    /// Number of entities cached so far.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Everything the consumers share: the schema cache and the applied counter.
#[derive(Debug, Default)]
pub struct SharedState {
    pub applied: AppliedCounter,
    pub temporal_columns: TemporalColumnCache,
}

impl SharedState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}
