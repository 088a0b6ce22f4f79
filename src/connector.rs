//! Debezium connector deployment through the Kafka Connect REST API.

use anyhow::{Context, Result};
use replica_sync_postgresql::PgEndpoint;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use sync_core::TrackedEntity;
use tracing::{debug, info};

use crate::readiness::{wait_until_ready, WaitBudget};

pub const CONNECTOR_CLASS: &str = "io.debezium.connector.postgresql.PostgresConnector";
const JSON_CONVERTER: &str = "org.apache.kafka.connect.json.JsonConverter";

/// Polling budget for the connector to report `RUNNING`.
pub const RUNNING_BUDGET: WaitBudget = WaitBudget::new(60, Duration::from_secs(3));

/// What the connector needs to know about the source and the change topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorSettings {
    pub name: String,
    pub database_host: String,
    pub database_port: u16,
    pub database_user: String,
    pub database_password: String,
    pub database_name: String,
    pub topic_prefix: String,
    pub slot_name: String,
    pub plugin: String,
    pub publication_name: String,
}

impl ConnectorSettings {
    /// Settings pointing the connector at `source`.
    ///
    /// `host_override` replaces the connection string's host, for when Kafka
    /// Connect reaches the source under another name.
    pub fn for_source(
        name: &str,
        source: &PgEndpoint,
        host_override: Option<&str>,
        topic_prefix: &str,
        slot_name: &str,
        plugin: &str,
        publication_name: &str,
    ) -> Result<Self> {
        let database_host = match host_override {
            Some(host) => host.to_string(),
            None => source
                .host()
                .context("Source connection string has no host for the connector")?,
        };
        Ok(Self {
            name: name.to_string(),
            database_host,
            database_port: source.port(),
            database_user: source.user().unwrap_or("postgres").to_string(),
            database_password: source.password().unwrap_or_default(),
            database_name: source
                .database()
                .context("Source connection string has no database name")?
                .to_string(),
            topic_prefix: topic_prefix.to_string(),
            slot_name: slot_name.to_string(),
            plugin: plugin.to_string(),
            publication_name: publication_name.to_string(),
        })
    }
}

/// `schema.table,...` for every tracked entity.
pub fn table_include_list(entities: &[TrackedEntity]) -> String {
    entities
        .iter()
        .map(TrackedEntity::qualified_name)
        .collect::<Vec<_>>()
        .join(",")
}

/// The `POST /connectors` body.
///
/// Debezium takes no snapshot of its own (the bulk copy already did) and
/// emits plain JSON without embedded schemas.
pub fn connector_config(settings: &ConnectorSettings, entities: &[TrackedEntity]) -> Value {
    json!({
        "name": settings.name,
        "config": {
            "connector.class": CONNECTOR_CLASS,
            "database.hostname": settings.database_host,
            "database.port": settings.database_port.to_string(),
            "database.user": settings.database_user,
            "database.password": settings.database_password,
            "database.dbname": settings.database_name,
            "topic.prefix": settings.topic_prefix,
            "slot.name": settings.slot_name,
            "plugin.name": settings.plugin,
            "publication.name": settings.publication_name,
            "snapshot.mode": "never",
            "table.include.list": table_include_list(entities),
            "key.converter": JSON_CONVERTER,
            "key.converter.schemas.enable": "false",
            "value.converter": JSON_CONVERTER,
            "value.converter.schemas.enable": "false",
            "tombstones.on.delete": "false",
            "decimal.handling.mode": "string",
            "time.precision.mode": "isostring",
        }
    })
}

/// `connector.state` of a `/connectors/<name>/status` response.
pub fn connector_state(status: &Value) -> Option<&str> {
    status.get("connector")?.get("state")?.as_str()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployOutcome {
    Created,
    AlreadyExists,
}

/// Map the deploy response status to an outcome.
pub fn deploy_outcome(status: StatusCode, body: &str) -> Result<DeployOutcome> {
    match status {
        StatusCode::OK | StatusCode::CREATED => Ok(DeployOutcome::Created),
        StatusCode::CONFLICT => Ok(DeployOutcome::AlreadyExists),
        _ => anyhow::bail!("Connector deployment failed ({status}): {body}"),
    }
}

/// Kafka Connect REST client.
#[derive(Debug, Clone)]
pub struct ConnectClient {
    http: Client,
    base_url: String,
}

impl ConnectClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Register the connector described by `config`.
    pub async fn deploy(&self, config: &Value) -> Result<DeployOutcome> {
        let url = format!("{}/connectors", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(config)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to post connector to '{url}': {e}"))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let outcome = deploy_outcome(status, &body)?;
        match outcome {
            DeployOutcome::Created => info!("Connector deployed"),
            DeployOutcome::AlreadyExists => info!("Connector already exists, keeping it"),
        }
        Ok(outcome)
    }

    /// Current `connector.state` of `name`.
    pub async fn state(&self, name: &str) -> Result<String> {
        let url = format!("{}/connectors/{name}/status", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to fetch connector status from '{url}': {e}"))?;
        if !response.status().is_success() {
            anyhow::bail!("Connector status returned {}: {url}", response.status());
        }
        let status: Value = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Invalid connector status from '{url}': {e}"))?;
        connector_state(&status)
            .map(str::to_string)
            .with_context(|| format!("Connector status without connector.state: {status}"))
    }

    /// Poll until `name` reports `RUNNING`.
    pub async fn wait_until_running(&self, name: &str, budget: WaitBudget) -> Result<()> {
        wait_until_ready(&format!("connector {name}"), budget, || async move {
            let state = self.state(name).await?;
            debug!("Connector {name} is {state}");
            if state != "RUNNING" {
                anyhow::bail!("connector state is {state}");
            }
            Ok::<(), anyhow::Error>(())
        })
        .await?;
        Ok(())
    }
}
