//! Value representations for change-event row images.
//!
//! Change events arrive as JSON. Each column of a before/after image is
//! decoded into a [`Value`], and the image itself into a [`Record`] that keeps
//! the columns in the order they appeared in the message.

use serde_json::{Map, Number};
use std::fmt;

/// A dynamically-typed scalar column value.
///
/// Nested JSON (objects and arrays, as produced for `json`/`jsonb` columns)
/// is carried as [`Value::Text`] holding its JSON serialization.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL / JSON null
    Null,

    /// Boolean value
    Bool(bool),

    /// Integer or floating point number, kept exactly as decoded
    Number(Number),

    /// String value
    Text(String),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Try to get this value as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get this value as an i64.
    ///
    /// Floating point numbers are truncated toward zero.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite() && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                    .map(|f| f.trunc() as i64)
            }),
            _ => None,
        }
    }

    /// Try to get this value as an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Convert this value back into JSON.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Value::Number(n.clone()),
            Self::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n),
            serde_json::Value::String(s) => Self::Text(s),
            nested @ (serde_json::Value::Array(_) | serde_json::Value::Object(_)) => {
                Self::Text(nested.to_string())
            }
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Number(value.into())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// An ordered mapping of column name to [`Value`]: one before- or after-image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    columns: Vec<(String, Value)>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from a decoded JSON object, keeping its key order.
    pub fn from_json_object(object: Map<String, serde_json::Value>) -> Self {
        Self {
            columns: object
                .into_iter()
                .map(|(name, value)| (name, Value::from(value)))
                .collect(),
        }
    }

    /// Set a column, replacing the value in place if the column already exists.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.columns.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = value,
            None => self.columns.push((name, value)),
        }
    }

    /// Get a column's value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Check whether the record has a column.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterate over `(column, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Column names in order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the record has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Apply `f` to every column value, keeping names and order.
    pub fn map_values<F>(self, mut f: F) -> Self
    where
        F: FnMut(&str, Value) -> Value,
    {
        Self {
            columns: self
                .columns
                .into_iter()
                .map(|(name, value)| {
                    let value = f(&name, value);
                    (name, value)
                })
                .collect(),
        }
    }

    /// Convert the record to a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        let object: Map<String, serde_json::Value> = self
            .columns
            .iter()
            .map(|(n, v)| (n.clone(), v.to_json()))
            .collect();
        serde_json::Value::Object(object)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::from(42).as_i64(), Some(42));
        assert_eq!(Value::from("abc").as_str(), Some("abc"));
        assert!(Value::Null.is_null());

        // Cross-type conversions
        assert_eq!(Value::from(json!(12.9)).as_i64(), Some(12));
        assert_eq!(Value::Bool(true).as_i64(), None);
        assert_eq!(Value::from("1").as_i64(), None);
    }

    #[test]
    fn test_nested_json_is_carried_as_text() {
        let value = Value::from(json!({"a": [1, 2]}));
        assert_eq!(value, Value::Text(r#"{"a":[1,2]}"#.to_string()));
    }

    #[test]
    fn test_record_keeps_message_order() {
        let object = json!({"zeta": 1, "alpha": "x", "id": 7});
        let record = Record::from_json_object(object.as_object().unwrap().clone());
        let names: Vec<&str> = record.column_names().collect();
        assert_eq!(names, vec!["zeta", "alpha", "id"]);
    }

    #[test]
    fn test_record_insert_replaces_in_place() {
        let mut record: Record = [("id", Value::from(1)), ("name", Value::from("a"))]
            .into_iter()
            .collect();
        record.insert("id", 2);
        assert_eq!(record.len(), 2);
        assert_eq!(record.get("id"), Some(&Value::from(2)));
        assert_eq!(record.column_names().next(), Some("id"));
    }

    #[test]
    fn test_record_to_json() {
        let record: Record = [
            ("id", Value::from(1)),
            ("ok", Value::Bool(false)),
            ("note", Value::Null),
        ]
        .into_iter()
        .collect();
        assert_eq!(record.to_json(), json!({"id": 1, "ok": false, "note": null}));
    }
}
