//! Change-log bookmarks: logical replication slots on the source.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use checkpoint::Checkpoint;
use serde::{Deserialize, Serialize};
use tokio_postgres::Client;
use tracing::info;

use crate::bootstrap::BookmarkManager;

/// Default slot name.
pub const DEFAULT_SLOT_NAME: &str = "debezium_slot";

/// Default decoding plugin.
pub const DEFAULT_PLUGIN: &str = "pgoutput";

/// A logical replication slot and the LSN it was created at.
///
/// Everything committed after `lsn` is retained by the source until the
/// slot is consumed, so the change stream started from this slot covers
/// every write the bulk copy may have missed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationBookmark {
    pub slot_name: String,
    /// LSN in PostgreSQL's text form, e.g. `0/1A2B3C`
    pub lsn: String,
    pub plugin: String,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint for ReplicationBookmark {
    const DATABASE_TYPE: &'static str = "postgresql-slot";

    /// `slot_name@lsn`
    fn to_cli_string(&self) -> String {
        format!("{}@{}", self.slot_name, self.lsn)
    }

    fn from_cli_string(s: &str) -> Result<Self> {
        let (slot_name, lsn) = s
            .split_once('@')
            .with_context(|| format!("Invalid bookmark '{s}', expected <slot>@<lsn>"))?;
        if slot_name.is_empty() || !lsn.contains('/') {
            anyhow::bail!("Invalid bookmark '{s}', expected <slot>@<lsn>");
        }
        Ok(Self {
            slot_name: slot_name.to_string(),
            lsn: lsn.to_string(),
            plugin: DEFAULT_PLUGIN.to_string(),
            created_at: Utc::now(),
        })
    }
}

/// Creates the bookmark on a PostgreSQL source.
pub struct PgBookmarkManager {
    client: Client,
    slot_name: String,
    plugin: String,
}

impl PgBookmarkManager {
    pub fn new(client: Client, slot_name: impl Into<String>, plugin: impl Into<String>) -> Self {
        Self {
            client,
            slot_name: slot_name.into(),
            plugin: plugin.into(),
        }
    }

    /// Drop the slot if a previous run left it behind.
    async fn drop_stale_slot(&self) -> Result<()> {
        let existing = self
            .client
            .query(
                "SELECT slot_name::text FROM pg_replication_slots WHERE slot_name = $1",
                &[&self.slot_name],
            )
            .await
            .context("Failed to check for existing replication slot")?;

        if existing.is_empty() {
            return Ok(());
        }

        info!("Dropping existing replication slot: {}", self.slot_name);
        self.client
            .execute("SELECT pg_drop_replication_slot($1)", &[&self.slot_name])
            .await
            .with_context(|| format!("Failed to drop replication slot {}", self.slot_name))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl BookmarkManager for PgBookmarkManager {
    type Bookmark = ReplicationBookmark;

    async fn create_bookmark(&self) -> Result<ReplicationBookmark> {
        self.drop_stale_slot().await?;

        info!(
            "Creating logical replication slot {} with plugin {}",
            self.slot_name, self.plugin
        );
        let row = self
            .client
            .query_one(
                "SELECT slot_name::text, lsn::text FROM pg_create_logical_replication_slot($1, $2)",
                &[&self.slot_name, &self.plugin],
            )
            .await
            .with_context(|| format!("Failed to create replication slot {}", self.slot_name))?;

        let bookmark = ReplicationBookmark {
            slot_name: row.get(0),
            lsn: row.get(1),
            plugin: self.plugin.clone(),
            created_at: Utc::now(),
        };
        info!(
            "Created replication slot {} at LSN {}",
            bookmark.slot_name, bookmark.lsn
        );
        Ok(bookmark)
    }
}
