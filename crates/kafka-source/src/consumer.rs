use crate::error::{Error, Result};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer as RdkafkaConsumer, StreamConsumer as RdkafkaStreamConsumer};
use rdkafka::message::{BorrowedMessage as RdkafkaBorrowedMessage, Message as RdkafkaMessage};
use rdkafka::{Offset, TopicPartitionList};
use sync_core::TrackedEntity;
use tracing::debug;

/// Every change topic is read from this partition only.
pub const CHANGE_PARTITION: i32 = 0;

/// Configuration for the per-entity partition readers
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Kafka brokers (comma-separated list)
    pub brokers: String,
    /// Prefix of the per-reader `group.id`; offsets are never committed, the
    /// group only names the client in broker logs.
    pub group_id_prefix: String,
    /// Smallest response the broker may answer a fetch with
    pub fetch_min_bytes: u32,
    /// Largest response the broker may answer a fetch with
    pub fetch_max_bytes: u32,
    /// How long the broker may hold a fetch waiting for `fetch_min_bytes`
    pub fetch_wait_max_ms: u32,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            group_id_prefix: "replica-sync".to_string(),
            fetch_min_bytes: 1,
            fetch_max_bytes: 10_000_000,
            fetch_wait_max_ms: 1000,
        }
    }
}

impl ConsumerConfig {
    /// librdkafka configuration for reading `topic`.
    pub fn client_config(&self, topic: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", format!("{}-{topic}", self.group_id_prefix))
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("enable.partition.eof", "false")
            .set("fetch.min.bytes", self.fetch_min_bytes.to_string())
            .set("fetch.max.bytes", self.fetch_max_bytes.to_string())
            .set("fetch.wait.max.ms", self.fetch_wait_max_ms.to_string());
        config
    }
}

/// One record read from a change topic.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Kafka topic
    pub topic: String,
    /// Kafka partition
    pub partition: i32,
    /// Kafka offset
    pub offset: i64,
    /// Message key (if any)
    pub key: Option<Vec<u8>>,
    /// Message value; `None` for tombstones
    pub payload: Option<Vec<u8>>,
}

/// Ordered source of raw change messages for one entity.
#[async_trait::async_trait]
pub trait EventReader: Send {
    /// Wait for the next message.
    async fn next_message(&mut self) -> Result<Message>;
}

/// Opens readers positioned at the earliest retained message.
///
/// Dropping a reader closes it; the consumer loop opens a fresh one after
/// every read failure.
#[async_trait::async_trait]
pub trait ReaderFactory: Send + Sync + 'static {
    type Reader: EventReader;

    async fn open(&self, entity: &TrackedEntity) -> Result<Self::Reader>;
}

/// Reader of partition 0 of one topic, without consumer-group coordination.
pub struct PartitionReader {
    consumer: RdkafkaStreamConsumer,
}

impl PartitionReader {
    /// Create a reader assigned to `topic` partition 0 at the beginning.
    pub fn new(config: &ConsumerConfig, topic: &str) -> Result<Self> {
        let consumer: RdkafkaStreamConsumer = config
            .client_config(topic)
            .create()
            .map_err(|e| Error::Consumer(format!("Failed to create consumer: {e}")))?;

        let mut assignment = TopicPartitionList::new();
        assignment
            .add_partition_offset(topic, CHANGE_PARTITION, Offset::Beginning)
            .map_err(|e| Error::Consumer(format!("Failed to add partition offset: {e}")))?;
        consumer
            .assign(&assignment)
            .map_err(|e| Error::Consumer(format!("Failed to assign partition: {e}")))?;

        debug!("Assigned {topic}[{CHANGE_PARTITION}] from the earliest offset");
        Ok(Self { consumer })
    }

    /// Get the underlying consumer (for advanced use cases)
    pub fn inner(&self) -> &RdkafkaStreamConsumer {
        &self.consumer
    }
}

fn to_message(msg: &RdkafkaBorrowedMessage) -> Message {
    Message {
        topic: msg.topic().to_string(),
        partition: msg.partition(),
        offset: msg.offset(),
        key: msg.key().map(|k| k.to_vec()),
        payload: msg.payload().map(|p| p.to_vec()),
    }
}

#[async_trait::async_trait]
impl EventReader for PartitionReader {
    async fn next_message(&mut self) -> Result<Message> {
        let msg = self.consumer.recv().await?;
        Ok(to_message(&msg))
    }
}

/// [`ReaderFactory`] backed by a Kafka cluster.
#[derive(Debug, Clone)]
pub struct KafkaReaderFactory {
    config: ConsumerConfig,
}

impl KafkaReaderFactory {
    pub fn new(config: ConsumerConfig) -> Self {
        Self { config }
    }

    /// Get the config
    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl ReaderFactory for KafkaReaderFactory {
    type Reader = PartitionReader;

    async fn open(&self, entity: &TrackedEntity) -> Result<PartitionReader> {
        PartitionReader::new(&self.config, &entity.topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_fetch_settings() {
        let config = ConsumerConfig {
            brokers: "kafka:9092".to_string(),
            ..Default::default()
        };
        let client = config.client_config("ome.public.devices");

        assert_eq!(client.get("bootstrap.servers"), Some("kafka:9092"));
        assert_eq!(client.get("group.id"), Some("replica-sync-ome.public.devices"));
        assert_eq!(client.get("enable.auto.commit"), Some("false"));
        assert_eq!(client.get("fetch.min.bytes"), Some("1"));
        assert_eq!(client.get("fetch.max.bytes"), Some("10000000"));
        assert_eq!(client.get("fetch.wait.max.ms"), Some("1000"));
    }
}
