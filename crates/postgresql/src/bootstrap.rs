//! Bootstrap: bookmark the change log, then bulk-copy.
//!
//! The bookmark must exist (and be durable) before the dump takes its
//! snapshot. Rows committed between the two points show up both in the dump
//! and in the change stream; idempotent application reconciles them.

use anyhow::{Context, Result};
use checkpoint::{Checkpoint, FilesystemStore, SyncPhase};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;

/// Creates the change-log bookmark on the source.
#[async_trait::async_trait]
pub trait BookmarkManager: Send + Sync {
    type Bookmark: Checkpoint + Send + Sync;

    /// Drop any stale bookmark of the same name and create a fresh one.
    async fn create_bookmark(&self) -> Result<Self::Bookmark>;
}

/// Moves the existing rows from the source to the replica.
#[async_trait::async_trait]
pub trait BulkTransfer: Send + Sync {
    /// Dump the source, returning the artifact path.
    async fn export(&self) -> Result<PathBuf>;

    /// Restore the artifact into the replica.
    async fn import(&self, dump: &Path) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct BootstrapReport<B> {
    pub bookmark: B,
    pub dump_path: PathBuf,
    pub export_duration: Duration,
    pub import_duration: Duration,
}

/// Runs bookmark creation and the bulk copy in order.
pub struct BootstrapSequencer<M, T> {
    bookmarks: M,
    transfer: T,
    checkpoints: Option<FilesystemStore>,
}

impl<M: BookmarkManager, T: BulkTransfer> BootstrapSequencer<M, T> {
    pub fn new(bookmarks: M, transfer: T) -> Self {
        Self {
            bookmarks,
            transfer,
            checkpoints: None,
        }
    }

    /// Persist the bookmark to `store` after creation and after the copy.
    pub fn with_checkpoints(mut self, store: FilesystemStore) -> Self {
        self.checkpoints = Some(store);
        self
    }

    /// Any error is fatal; nothing here is retried.
    pub async fn run(&self) -> Result<BootstrapReport<M::Bookmark>> {
        info!("Creating change-log bookmark");
        let bookmark = self
            .bookmarks
            .create_bookmark()
            .await
            .context("Failed to create change-log bookmark")?;
        self.save_checkpoint(&bookmark, SyncPhase::BookmarkCreated)?;

        info!("Bulk export from source");
        let start = Instant::now();
        let dump_path = self.transfer.export().await.context("Bulk export failed")?;
        let export_duration = start.elapsed();
        info!("Export finished in {:?}", export_duration);

        info!("Bulk import into replica");
        let start = Instant::now();
        self.transfer
            .import(&dump_path)
            .await
            .context("Bulk import failed")?;
        let import_duration = start.elapsed();
        info!("Import finished in {:?}", import_duration);

        self.save_checkpoint(&bookmark, SyncPhase::BulkCopyComplete)?;

        Ok(BootstrapReport {
            bookmark,
            dump_path,
            export_duration,
            import_duration,
        })
    }

    fn save_checkpoint(&self, bookmark: &M::Bookmark, phase: SyncPhase) -> Result<()> {
        if let Some(store) = &self.checkpoints {
            store.save(bookmark, phase)?;
        }
        Ok(())
    }
}
