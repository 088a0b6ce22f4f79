//! Checkpoint management for replica-sync
//!
//! Records the positions the bootstrap sequence passes through so an operator
//! (or a later run) can see where streaming picks up:
//!
//! - `BookmarkCreated` (t1) - the change-log bookmark, written before the bulk copy
//! - `BulkCopyComplete` (t2) - written once the copy has been restored
//!
//! Database-specific checkpoint types implement the [`Checkpoint`] trait and
//! are stored through [`FilesystemStore`] wrapped in a [`CheckpointFile`].

mod file;
mod filesystem;
mod phase;

#[cfg(test)]
mod tests;

pub use file::CheckpointFile;
pub use filesystem::FilesystemStore;
pub use phase::SyncPhase;

/// Trait that database-specific checkpoints must implement.
///
/// # Example
///
/// ```rust
/// use checkpoint::Checkpoint;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct OffsetCheckpoint {
///     pub offset: i64,
/// }
///
/// impl Checkpoint for OffsetCheckpoint {
///     const DATABASE_TYPE: &'static str = "offset";
///
///     fn to_cli_string(&self) -> String {
///         self.offset.to_string()
///     }
///
///     fn from_cli_string(s: &str) -> anyhow::Result<Self> {
///         Ok(Self { offset: s.parse()? })
///     }
/// }
/// ```
pub trait Checkpoint: serde::Serialize + for<'de> serde::Deserialize<'de> + Clone {
    /// Checkpoint type identifier, stored in every file and checked on load.
    const DATABASE_TYPE: &'static str;

    /// Convert to a short, human-readable form for logs and CLI output.
    ///
    /// The returned string should be parseable by `from_cli_string()`.
    fn to_cli_string(&self) -> String;

    /// Parse from the form produced by `to_cli_string()`.
    fn from_cli_string(s: &str) -> anyhow::Result<Self>
    where
        Self: Sized;
}
