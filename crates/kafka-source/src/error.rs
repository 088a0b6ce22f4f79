//! Errors raised by change-stream readers and consumers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Consumer error: {0}")]
    Consumer(String),

    #[error("Gave up on topic {topic} after {failures} consecutive read failures")]
    RetriesExhausted { topic: String, failures: u32 },
}

pub type Result<T> = std::result::Result<T, Error>;
