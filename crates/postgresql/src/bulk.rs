//! Bulk copy through `pg_dump` and `pg_restore`.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::bootstrap::BulkTransfer;
use crate::connect::{quote_ident, PgEndpoint};

/// Default location of the dump artifact.
pub const DEFAULT_DUMP_PATH: &str = "/tmp/replica-sync.dump";

/// Database used for `DROP DATABASE` / `CREATE DATABASE` on the replica.
pub const ADMIN_DATABASE: &str = "postgres";

#[derive(Debug, thiserror::Error)]
pub enum BulkTransferError {
    #[error("Failed to launch {tool}: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: &'static str,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("Connection string does not name a database")]
    MissingDatabase,

    #[error("Failed to recreate replica database {database}: {source}")]
    Recreate {
        database: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Copies the source database into the replica with the PostgreSQL client
/// tools, which must be on `PATH`.
#[derive(Debug, Clone)]
pub struct PgDumpTransfer {
    source: PgEndpoint,
    replica: PgEndpoint,
    dump_path: PathBuf,
    recreate_replica: bool,
}

impl PgDumpTransfer {
    pub fn new(source: PgEndpoint, replica: PgEndpoint, dump_path: impl Into<PathBuf>) -> Self {
        Self {
            source,
            replica,
            dump_path: dump_path.into(),
            recreate_replica: true,
        }
    }

    /// Whether the replica database is dropped and created before restoring.
    pub fn recreate_replica(mut self, recreate: bool) -> Self {
        self.recreate_replica = recreate;
        self
    }

    /// Custom-format dump of the source, without ownership or grants.
    pub fn dump_args(&self) -> Vec<String> {
        let mut args = self.source.tool_args();
        args.extend(["-F", "c", "-f"].map(String::from));
        args.push(self.dump_path.to_string_lossy().into_owned());
        args.push("--no-owner".to_string());
        args.push("--no-privileges".to_string());
        args
    }

    /// Restore of `dump` into the replica, without ownership or grants.
    pub fn restore_args(&self, dump: &Path) -> Vec<String> {
        let mut args = self.replica.tool_args();
        args.push("--no-owner".to_string());
        args.push("--no-privileges".to_string());
        args.push(dump.to_string_lossy().into_owned());
        args
    }

    async fn recreate_replica_database(&self) -> Result<(), BulkTransferError> {
        let database = self
            .replica
            .database()
            .ok_or(BulkTransferError::MissingDatabase)?
            .to_string();
        let recreate = |source: Box<dyn std::error::Error + Send + Sync>| {
            BulkTransferError::Recreate {
                database: database.clone(),
                source,
            }
        };

        info!("Recreating replica database {database}");
        let admin = self
            .replica
            .with_database(ADMIN_DATABASE)
            .connect()
            .await
            .map_err(|e| recreate(e.into()))?;

        let quoted = quote_ident(&database);
        for statement in [
            format!("DROP DATABASE IF EXISTS {quoted}"),
            format!("CREATE DATABASE {quoted}"),
        ] {
            debug!("{statement}");
            admin
                .batch_execute(&statement)
                .await
                .map_err(|e| recreate(e.into()))?;
        }
        Ok(())
    }
}

/// Run a client tool to completion, capturing stderr into the error.
async fn run_tool(
    tool: &'static str,
    args: &[String],
    password: Option<String>,
) -> Result<(), BulkTransferError> {
    let mut command = Command::new(tool);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    if let Some(password) = password {
        command.env("PGPASSWORD", password);
    }

    debug!("Running {tool} {}", args.join(" "));
    let output = command
        .output()
        .await
        .map_err(|source| BulkTransferError::Spawn { tool, source })?;

    if !output.status.success() {
        return Err(BulkTransferError::ToolFailed {
            tool,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

#[async_trait::async_trait]
impl BulkTransfer for PgDumpTransfer {
    async fn export(&self) -> anyhow::Result<PathBuf> {
        run_tool("pg_dump", &self.dump_args(), self.source.password()).await?;

        let size = tokio::fs::metadata(&self.dump_path)
            .await
            .map(|m| m.len())
            .unwrap_or_default();
        info!("Dump: {} bytes at {}", size, self.dump_path.display());
        Ok(self.dump_path.clone())
    }

    async fn import(&self, dump: &Path) -> anyhow::Result<()> {
        if self.recreate_replica {
            self.recreate_replica_database().await?;
        }
        run_tool("pg_restore", &self.restore_args(dump), self.replica.password()).await?;
        Ok(())
    }
}
