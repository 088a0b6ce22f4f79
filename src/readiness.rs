//! Startup readiness checks for the source, replica, Kafka and Kafka Connect.
//!
//! Every check polls a probe until it succeeds or its [`WaitBudget`] runs
//! out. Running out is a fatal startup error.

use anyhow::{Context, Result};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use replica_sync_postgresql::{catalog, PgEndpoint, ADMIN_DATABASE};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How many times a probe runs, and how long to wait between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitBudget {
    pub attempts: u32,
    pub interval: Duration,
}

impl WaitBudget {
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Upper bound of the time spent sleeping between attempts.
    pub fn total(&self) -> Duration {
        self.interval * self.attempts.saturating_sub(1)
    }
}

pub const SOURCE_BUDGET: WaitBudget = WaitBudget::new(120, Duration::from_secs(2));
pub const REPLICA_BUDGET: WaitBudget = WaitBudget::new(60, Duration::from_secs(2));
pub const KAFKA_BUDGET: WaitBudget = WaitBudget::new(90, Duration::from_secs(2));
pub const CONNECT_BUDGET: WaitBudget = WaitBudget::new(120, Duration::from_secs(3));

/// Run `probe` until it succeeds, at most `budget.attempts` times.
///
/// Returns the number of attempts it took. The error after the last attempt
/// carries the probe's final failure.
pub async fn wait_until_ready<F, Fut>(what: &str, budget: WaitBudget, mut probe: F) -> Result<u32>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut last_error = None;

    for attempt in 1..=budget.attempts {
        match probe().await {
            Ok(()) => {
                info!("{what} is ready (attempt {attempt})");
                return Ok(attempt);
            }
            Err(e) => {
                debug!(
                    "{what} not ready (attempt {attempt}/{}): {e:#}",
                    budget.attempts
                );
                last_error = Some(e);
                if attempt < budget.attempts {
                    tokio::time::sleep(budget.interval).await;
                }
            }
        }
    }

    let error = last_error.unwrap_or_else(|| anyhow::anyhow!("no attempts were made"));
    warn!("Gave up waiting for {what} after {} attempts", budget.attempts);
    Err(error).context(format!(
        "{what} did not become ready after {} attempts",
        budget.attempts
    ))
}

/// The source accepts queries and `probe_table` already holds rows.
pub async fn source_ready(endpoint: &PgEndpoint, schema: &str, probe_table: &str) -> Result<()> {
    let client = endpoint.connect().await?;
    let rows = catalog::count_rows(&client, schema, probe_table).await?;
    if rows == 0 {
        anyhow::bail!("{schema}.{probe_table} has no rows yet");
    }
    Ok(())
}

/// The replica server accepts queries on its admin database.
///
/// The replica's own database may not exist yet; the bulk import creates it.
pub async fn replica_ready(endpoint: &PgEndpoint) -> Result<()> {
    let client = endpoint.with_database(ADMIN_DATABASE).connect().await?;
    client
        .simple_query("SELECT 1")
        .await
        .context("Replica did not answer a trivial query")?;
    Ok(())
}

/// A broker answers a metadata request.
pub async fn kafka_ready(brokers: &str) -> Result<()> {
    let brokers = brokers.to_string();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let consumer: BaseConsumer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .create()
            .context("Failed to create Kafka metadata client")?;
        let metadata = consumer
            .fetch_metadata(None, Duration::from_secs(5))
            .with_context(|| format!("Failed to fetch metadata from {brokers}"))?;
        debug!("Kafka reports {} broker(s)", metadata.brokers().len());
        Ok(())
    })
    .await
    .context("Kafka metadata task panicked")?
}

/// Kafka Connect's REST API lists connectors.
pub async fn connect_ready(client: &reqwest::Client, connect_url: &str) -> Result<()> {
    let url = format!("{}/connectors", connect_url.trim_end_matches('/'));
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to reach Kafka Connect at '{url}': {e}"))?;
    if response.status() != reqwest::StatusCode::OK {
        anyhow::bail!("Kafka Connect returned status {}: {url}", response.status());
    }
    Ok(())
}
