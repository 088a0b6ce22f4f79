//! Error types for change-event decoding.

use thiserror::Error;

/// Errors raised while decoding a raw change-stream message.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The message body is not valid JSON.
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The decoded JSON is not an object.
    #[error("Expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    /// The event carries no `op` field.
    #[error("Missing 'op' field")]
    MissingOperation,

    /// The `op` field holds a code we do not apply.
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),
}
