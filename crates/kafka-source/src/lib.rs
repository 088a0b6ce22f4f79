//! Kafka change-stream consumers for replica-sync.
//!
//! This crate provides:
//! - A partition reader over one change topic per tracked entity
//! - The change applier turning decoded events into idempotent replica writes
//! - Per-entity consumer tasks that reconnect after read failures
//!
//! # Example
//!
//! ```ignore
//! use replica_sync_kafka_source::{
//!     spawn_consumers, ChangeApplier, ConsumerConfig, KafkaReaderFactory, RetryPolicy,
//!     SharedState,
//! };
//!
//! let state = SharedState::new();
//! let applier = ChangeApplier::new(Arc::new(sink), Arc::clone(&state));
//! let factory = Arc::new(KafkaReaderFactory::new(ConsumerConfig::default()));
//! let handles = spawn_consumers(&entities, factory, applier, RetryPolicy::default());
//! ```

/// Partition readers and the reader seam
pub mod consumer;
pub mod error;
pub mod retry;
pub mod sync;

/// In-memory sink and broker for exercising consumers without infrastructure
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use consumer::{
    ConsumerConfig, EventReader, KafkaReaderFactory, Message, PartitionReader, ReaderFactory,
    CHANGE_PARTITION,
};
pub use error::{Error, Result};
pub use retry::RetryPolicy;
pub use sync::{
    run_entity_consumer, spawn_consumers, AppliedCounter, ApplyOutcome, ChangeApplier,
    DropReason, SharedState, TemporalColumnCache,
};
