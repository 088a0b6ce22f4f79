//! Checkpoint file wrapper for self-describing serialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Checkpoint, SyncPhase};

/// Self-describing checkpoint file.
///
/// # File Format
///
/// ```json
/// {
///     "database_type": "postgresql-slot",
///     "checkpoint": {
///         "slot_name": "debezium_slot",
///         "lsn": "0/1949850",
///         "plugin": "pgoutput",
///         "created_at": "2024-01-01T00:00:00Z"
///     },
///     "phase": "BookmarkCreated",
///     "created_at": "2024-01-01T00:00:00Z"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointFile {
    /// Checkpoint type identifier (e.g., "postgresql-slot")
    pub database_type: String,
    /// Serialized checkpoint data
    pub checkpoint: serde_json::Value,
    /// Bootstrap phase this checkpoint marks
    pub phase: SyncPhase,
    /// When this file was written
    pub created_at: DateTime<Utc>,
}

impl CheckpointFile {
    /// Wrap a checkpoint for the given phase.
    pub fn new<C: Checkpoint>(checkpoint: &C, phase: SyncPhase) -> anyhow::Result<Self> {
        Ok(Self {
            database_type: C::DATABASE_TYPE.to_string(),
            checkpoint: serde_json::to_value(checkpoint)?,
            phase,
            created_at: Utc::now(),
        })
    }

    /// Parse the wrapped checkpoint, rejecting files of another type.
    pub fn parse<C: Checkpoint>(&self) -> anyhow::Result<C> {
        if self.database_type != C::DATABASE_TYPE {
            anyhow::bail!(
                "Checkpoint type mismatch: expected '{}', found '{}'",
                C::DATABASE_TYPE,
                self.database_type
            );
        }
        Ok(serde_json::from_value(self.checkpoint.clone())?)
    }
}
