//! Tracked entities: the tables being replicated.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default primary-key column of every tracked entity.
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// A replicated table, defined at configuration time and static afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackedEntity {
    /// Table name (unqualified)
    pub name: String,
    /// Schema the table lives in on both sides
    pub schema: String,
    /// Primary-key column used for upsert conflicts and deletes
    pub primary_key: String,
    /// Change-stream topic carrying this table's events
    pub topic: String,
}

impl TrackedEntity {
    /// Create an entity with the default primary key, deriving the topic as
    /// `<topic_prefix>.<schema>.<name>`.
    pub fn new(name: impl Into<String>, schema: impl Into<String>, topic_prefix: &str) -> Self {
        let name = name.into();
        let schema = schema.into();
        let topic = format!("{topic_prefix}.{schema}.{name}");
        Self {
            name,
            schema,
            primary_key: DEFAULT_PRIMARY_KEY.to_string(),
            topic,
        }
    }

    /// Override the primary-key column.
    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    /// `schema.name`, as used in `table.include.list` style configuration.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

impl fmt::Display for TrackedEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_derivation() {
        let entity = TrackedEntity::new("devices", "public", "ome");
        assert_eq!(entity.topic, "ome.public.devices");
        assert_eq!(entity.primary_key, "id");
        assert_eq!(entity.qualified_name(), "public.devices");
    }

    #[test]
    fn test_primary_key_override() {
        let entity = TrackedEntity::new("users", "app", "cdc").with_primary_key("user_id");
        assert_eq!(entity.primary_key, "user_id");
        assert_eq!(entity.topic, "cdc.app.users");
    }
}
