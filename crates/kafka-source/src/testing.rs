//! In-memory stand-ins for the replica and the broker.
//!
//! [`MemorySink`] stores rows per table keyed by primary key, with the same
//! upsert/delete semantics as the PostgreSQL sink. [`MemoryBroker`] keeps an
//! append-only log per topic and hands out readers that replay it from the
//! start, like a partition reader positioned at the earliest offset.

use anyhow::Result;
use replica_sink::ReplicaSink;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use sync_core::{Record, TrackedEntity, Value};
use tokio::sync::Notify;

use crate::consumer::{EventReader, Message, ReaderFactory};
use crate::error::{Error, Result as KafkaResult};

type Table = BTreeMap<String, Record>;

/// Replica kept in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    tables: Mutex<HashMap<String, Table>>,
    temporal: HashMap<String, HashSet<String>>,
    catalog_queries: AtomicUsize,
    failing_catalog: bool,
    failing_writes: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare temporal columns for `table`.
    pub fn with_temporal_columns<'a>(
        mut self,
        table: &str,
        columns: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        self.temporal.insert(
            table.to_string(),
            columns.into_iter().map(String::from).collect(),
        );
        self
    }

    /// Make every catalog query fail.
    pub fn with_failing_catalog(mut self) -> Self {
        self.failing_catalog = true;
        self
    }

    /// Make every write fail.
    pub fn with_failing_writes(mut self) -> Self {
        self.failing_writes = true;
        self
    }

    /// Seed a row directly, as a bulk copy would.
    pub fn seed(&self, table: &str, key_column: &str, row: Record) {
        let key = row.get(key_column).map(Value::to_string).unwrap_or_default();
        lock(&self.tables)
            .entry(table.to_string())
            .or_default()
            .insert(key, row);
    }

    pub fn row(&self, table: &str, key: &Value) -> Option<Record> {
        lock(&self.tables)
            .get(table)
            .and_then(|rows| rows.get(&key.to_string()))
            .cloned()
    }

    pub fn row_count(&self, table: &str) -> usize {
        lock(&self.tables).get(table).map_or(0, BTreeMap::len)
    }

    /// How many times `temporal_columns` was called.
    pub fn catalog_queries(&self) -> usize {
        self.catalog_queries.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ReplicaSink for MemorySink {
    async fn upsert(&self, entity: &TrackedEntity, row: &Record) -> Result<()> {
        if self.failing_writes {
            anyhow::bail!("replica unavailable");
        }
        let key = row
            .get(&entity.primary_key)
            .map(Value::to_string)
            .ok_or_else(|| anyhow::anyhow!("row has no {}", entity.primary_key))?;

        let mut tables = lock(&self.tables);
        let stored = tables
            .entry(entity.name.clone())
            .or_default()
            .entry(key)
            .or_default();
        for (column, value) in row.iter() {
            stored.insert(column, value.clone());
        }
        Ok(())
    }

    async fn delete(&self, entity: &TrackedEntity, key: &Value) -> Result<u64> {
        if self.failing_writes {
            anyhow::bail!("replica unavailable");
        }
        let removed = lock(&self.tables)
            .get_mut(&entity.name)
            .and_then(|rows| rows.remove(&key.to_string()));
        Ok(u64::from(removed.is_some()))
    }

    async fn temporal_columns(&self, entity: &TrackedEntity) -> Result<HashSet<String>> {
        self.catalog_queries.fetch_add(1, Ordering::SeqCst);
        // Let racing callers pile up behind the cache lock.
        tokio::task::yield_now().await;
        if self.failing_catalog {
            anyhow::bail!("relation \"information_schema.columns\" is not accessible");
        }
        Ok(self.temporal.get(&entity.name).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Default)]
struct Topic {
    log: Vec<Option<Vec<u8>>>,
    /// Remaining reads that fail instead of returning a message
    pending_failures: u32,
    /// Every read fails
    broken: bool,
    opens: u32,
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: Mutex<HashMap<String, Topic>>,
    appended: Notify,
}

/// Topics kept in memory; also the [`ReaderFactory`] opening them.
///
/// Clones share the same topics.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message value to `topic`.
    pub fn publish(&self, topic: &str, payload: impl AsRef<[u8]>) {
        self.append(topic, Some(payload.as_ref().to_vec()));
    }

    /// Append a message without a value.
    pub fn publish_tombstone(&self, topic: &str) {
        self.append(topic, None);
    }

    /// Fail the next `count` reads on `topic`.
    pub fn interrupt(&self, topic: &str, count: u32) {
        self.with_topic(topic, |t| t.pending_failures += count);
    }

    /// Fail every read on `topic` from now on.
    pub fn break_topic(&self, topic: &str) {
        self.with_topic(topic, |t| t.broken = true);
    }

    /// How many readers were opened on `topic`.
    pub fn opens(&self, topic: &str) -> u32 {
        lock(&self.state.topics).get(topic).map_or(0, |t| t.opens)
    }

    fn append(&self, topic: &str, payload: Option<Vec<u8>>) {
        self.with_topic(topic, |t| t.log.push(payload));
    }

    fn with_topic(&self, topic: &str, f: impl FnOnce(&mut Topic)) {
        f(lock(&self.state.topics).entry(topic.to_string()).or_default());
        self.state.appended.notify_waiters();
    }

    /// The message at `offset`, `Ok(None)` at the end of the log.
    fn read(&self, topic: &str, offset: usize) -> KafkaResult<Option<Message>> {
        let mut topics = lock(&self.state.topics);
        let state = topics.entry(topic.to_string()).or_default();
        if state.broken {
            return Err(Error::Consumer(format!("{topic}: broker connection lost")));
        }
        if state.pending_failures > 0 {
            state.pending_failures -= 1;
            return Err(Error::Consumer(format!("{topic}: fetch interrupted")));
        }
        Ok(state.log.get(offset).map(|payload| Message {
            topic: topic.to_string(),
            partition: 0,
            offset: offset as i64,
            key: None,
            payload: payload.clone(),
        }))
    }
}

/// Reader over a [`MemoryBroker`] topic.
pub struct MemoryReader {
    broker: MemoryBroker,
    topic: String,
    offset: usize,
}

#[async_trait::async_trait]
impl EventReader for MemoryReader {
    async fn next_message(&mut self) -> KafkaResult<Message> {
        loop {
            let appended = self.broker.state.appended.notified();
            if let Some(message) = self.broker.read(&self.topic, self.offset)? {
                self.offset += 1;
                return Ok(message);
            }
            appended.await;
        }
    }
}

#[async_trait::async_trait]
impl ReaderFactory for MemoryBroker {
    type Reader = MemoryReader;

    async fn open(&self, entity: &TrackedEntity) -> KafkaResult<MemoryReader> {
        lock(&self.state.topics)
            .entry(entity.topic.clone())
            .or_default()
            .opens += 1;
        Ok(MemoryReader {
            broker: self.clone(),
            topic: entity.topic.clone(),
            offset: 0,
        })
    }
}
