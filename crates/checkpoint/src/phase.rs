//! Bootstrap phase enumeration for checkpoint tracking.

use serde::{Deserialize, Serialize};

/// The points of the bootstrap sequence at which a checkpoint is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncPhase {
    /// Written once the change-log bookmark exists, before the bulk copy
    /// starts (t1). Streaming replays everything committed after it.
    BookmarkCreated,

    /// Written after the bulk copy has been restored into the replica (t2).
    BulkCopyComplete,
}

impl SyncPhase {
    /// Get the string representation of this phase.
    ///
    /// Used for checkpoint file naming (e.g., `checkpoint_bookmark_created.json`).
    pub fn as_str(&self) -> &str {
        match self {
            SyncPhase::BookmarkCreated => "bookmark_created",
            SyncPhase::BulkCopyComplete => "bulk_copy_complete",
        }
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
