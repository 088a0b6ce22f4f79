//! Change events as delivered by the change-capture subsystem.
//!
//! A message on an entity's change stream is JSON, either a bare record:
//!
//! ```json
//! { "op": "c", "before": null, "after": { "id": 1, "name": "db01" } }
//! ```
//!
//! or the same record wrapped in an outer envelope:
//!
//! ```json
//! { "payload": { "op": "c", "before": null, "after": { "id": 1, "name": "db01" } } }
//! ```

use crate::error::DecodeError;
use crate::values::Record;
use serde_json::{Map, Value as JsonValue};
use std::fmt;

/// The kind of mutation a change event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Row inserted (`c`)
    Create,
    /// Row emitted by an initial snapshot (`r`)
    SnapshotRead,
    /// Row updated (`u`)
    Update,
    /// Row deleted (`d`)
    Delete,
}

impl Operation {
    /// Parse the single-letter operation code.
    pub fn from_code(code: &str) -> Result<Self, DecodeError> {
        match code {
            "c" => Ok(Self::Create),
            "r" => Ok(Self::SnapshotRead),
            "u" => Ok(Self::Update),
            "d" => Ok(Self::Delete),
            other => Err(DecodeError::UnknownOperation(other.to_string())),
        }
    }

    /// The single-letter operation code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Create => "c",
            Self::SnapshotRead => "r",
            Self::Update => "u",
            Self::Delete => "d",
        }
    }

    /// Whether this operation is applied as an upsert of the after-image.
    pub fn is_upsert(&self) -> bool {
        !matches!(self, Self::Delete)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::SnapshotRead => write!(f, "snapshot-read"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// The outer shape of a change-stream message.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// The record fields sit at the top level.
    Bare(Map<String, JsonValue>),
    /// The record fields sit under `payload`.
    Wrapped(Map<String, JsonValue>),
}

impl Envelope {
    /// Parse a raw message into an envelope.
    ///
    /// A top-level `payload` that is an object selects [`Envelope::Wrapped`];
    /// anything else is treated as a bare record.
    pub fn parse(raw: &[u8]) -> Result<Self, DecodeError> {
        let value: JsonValue = serde_json::from_slice(raw)?;
        let mut object = match value {
            JsonValue::Object(object) => object,
            other => return Err(DecodeError::NotAnObject(json_kind(&other))),
        };

        match object.remove("payload") {
            Some(JsonValue::Object(payload)) => Ok(Self::Wrapped(payload)),
            Some(other) => {
                object.insert("payload".to_string(), other);
                Ok(Self::Bare(object))
            }
            None => Ok(Self::Bare(object)),
        }
    }

    /// The record fields, regardless of wrapping.
    pub fn into_body(self) -> Map<String, JsonValue> {
        match self {
            Self::Bare(body) | Self::Wrapped(body) => body,
        }
    }
}

/// One mutation of a tracked entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Operation kind
    pub op: Operation,
    /// Row image before the change (deletes and some updates)
    pub before: Option<Record>,
    /// Row image after the change (creates, snapshot reads, updates)
    pub after: Option<Record>,
}

impl ChangeEvent {
    /// Decode a raw change-stream message.
    ///
    /// `before` and `after` are `None` when absent, null or not an object.
    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        Self::from_envelope(Envelope::parse(raw)?)
    }

    /// Build an event from an already parsed envelope.
    pub fn from_envelope(envelope: Envelope) -> Result<Self, DecodeError> {
        let mut body = envelope.into_body();

        let op = match body.get("op") {
            Some(JsonValue::String(code)) => Operation::from_code(code)?,
            Some(JsonValue::Null) | None => return Err(DecodeError::MissingOperation),
            Some(other) => return Err(DecodeError::UnknownOperation(other.to_string())),
        };

        Ok(Self {
            op,
            before: take_image(&mut body, "before"),
            after: take_image(&mut body, "after"),
        })
    }

    /// The row image the applier writes from: `after` for upserts, `before`
    /// for deletes.
    pub fn image(&self) -> Option<&Record> {
        if self.op.is_upsert() {
            self.after.as_ref()
        } else {
            self.before.as_ref()
        }
    }
}

fn take_image(body: &mut Map<String, JsonValue>, key: &str) -> Option<Record> {
    match body.remove(key) {
        Some(JsonValue::Object(image)) => Some(Record::from_json_object(image)),
        _ => None,
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
