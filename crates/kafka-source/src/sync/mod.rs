//! Applying change streams to the replica.

pub mod apply;
pub mod incremental;
pub mod state;

pub use apply::{ApplyOutcome, ChangeApplier, DropReason};
pub use incremental::{run_entity_consumer, spawn_consumers};
pub use state::{AppliedCounter, SharedState, TemporalColumnCache};
