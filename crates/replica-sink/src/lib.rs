//! Replica sink trait abstraction.
//!
//! This crate defines the `ReplicaSink` trait that abstracts over the
//! database the change stream is replayed into. `replica-sync-postgresql`
//! provides the PostgreSQL implementation; the consumer crate ships an
//! in-memory implementation for tests.
//!
//! The trait uses sync-core types (`TrackedEntity`, `Record`, `Value`) so
//! that the change applier is not coupled to a specific driver.

mod traits;

pub use traits::ReplicaSink;
