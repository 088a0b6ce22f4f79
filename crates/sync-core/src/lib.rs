//! Core types for the replica-sync framework.
//!
//! This crate provides the foundational types shared by the source, sink and
//! consumer crates:
//!
//! - [`Value`] / [`Record`] - Dynamically-typed column values and row images
//! - [`ChangeEvent`] - One decoded mutation (create, snapshot read, update, delete)
//! - [`Envelope`] - A bare record or one wrapped in an outer `payload` object
//! - [`TrackedEntity`] - A replicated table and the topic carrying its changes
//! - [`temporal`] - Epoch-encoded temporal value normalization
//!
//! # Architecture
//!
//! ```text
//! sync-core (this crate)
//!    │
//!    ├─── replica-sink            (ReplicaSink trait over Record)
//!    ├─── replica-sync-postgresql (PostgreSQL sink, bookmark, bulk copy)
//!    └─── replica-sync-kafka-source (consumers and the change applier)
//! ```
//!
//! # Example
//!
//! ```rust
//! use sync_core::{ChangeEvent, Operation};
//!
//! let event = ChangeEvent::decode(
//!     br#"{"payload":{"op":"u","before":null,"after":{"id":1,"name":"db01"}}}"#,
//! )
//! .unwrap();
//!
//! assert_eq!(event.op, Operation::Update);
//! assert!(event.before.is_none());
//! assert_eq!(event.after.unwrap().len(), 2);
//! ```

pub mod entity;
pub mod error;
pub mod event;
pub mod temporal;
pub mod values;

pub use entity::TrackedEntity;
pub use error::DecodeError;
pub use event::{ChangeEvent, Envelope, Operation};
pub use temporal::{normalize_temporal, EpochUnit, Normalized};
pub use values::{Record, Value};
