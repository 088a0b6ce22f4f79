//! Filesystem-based checkpoint storage.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::{Checkpoint, CheckpointFile, SyncPhase};

/// Stores one JSON checkpoint file per phase in a directory.
///
/// Files are named `checkpoint_{phase}.json`; writing a phase again replaces
/// the previous file. Writes go to a temporary file that is synced and then
/// renamed, so a reader never observes a partial checkpoint.
#[derive(Debug, Clone)]
pub struct FilesystemStore {
    dir: PathBuf,
}

impl FilesystemStore {
    /// Create a store rooted at `dir` (created on first write).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Get the directory path.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `phase`.
    pub fn path_for(&self, phase: SyncPhase) -> PathBuf {
        self.dir.join(format!("checkpoint_{}.json", phase.as_str()))
    }

    /// Write `checkpoint` for `phase`, returning the file path.
    pub fn save<C: Checkpoint>(&self, checkpoint: &C, phase: SyncPhase) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).with_context(|| {
            format!("Failed to create checkpoint directory {}", self.dir.display())
        })?;

        let file = CheckpointFile::new(checkpoint, phase)?;
        let path = self.path_for(phase);
        let tmp = path.with_extension("json.tmp");

        let mut out = File::create(&tmp)
            .with_context(|| format!("Failed to create {}", tmp.display()))?;
        out.write_all(serde_json::to_string_pretty(&file)?.as_bytes())?;
        out.sync_all()?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to move checkpoint into {}", path.display()))?;

        tracing::info!(
            "Stored {} checkpoint {} to {}",
            phase,
            checkpoint.to_cli_string(),
            path.display()
        );
        Ok(path)
    }

    /// Read the checkpoint for `phase`, or `None` if it was never written.
    pub fn load<C: Checkpoint>(&self, phase: SyncPhase) -> Result<Option<C>> {
        let path = self.path_for(phase);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file: CheckpointFile = serde_json::from_str(&content)
            .with_context(|| format!("Invalid checkpoint file {}", path.display()))?;
        if file.phase != phase {
            anyhow::bail!(
                "Checkpoint file {} holds phase {}, expected {}",
                path.display(),
                file.phase,
                phase
            );
        }
        Ok(Some(file.parse()?))
    }
}
