//! PostgreSQL replica writes.
//!
//! Row images are bound as a single JSON parameter and expanded with
//! `json_populate_record`, so every column value is coerced by the replica's
//! own input functions for the declared column type: ISO-8601 text lands in
//! `timestamp` columns, JSON numbers in `integer` / `numeric` columns, and so
//! on, without the client having to know each column's type. The exception
//! is `json` / `jsonb`: `json_populate_record` stores a JSON string as a
//! string scalar, so text values of those columns are parsed back into JSON
//! documents before binding.
//!
//! A closed connection (replica restart, terminated backend) is replaced with
//! a new one and the statement is retried once.
//!
//! Upsert:
//!
//! ```sql
//! INSERT INTO "public"."devices" ("id", "name")
//! SELECT "id", "name" FROM json_populate_record(NULL::"public"."devices", $1::json)
//! ON CONFLICT ("id") DO UPDATE SET "name" = EXCLUDED."name"
//! ```
//!
//! Delete:
//!
//! ```sql
//! DELETE FROM "public"."devices"
//! WHERE "id" = (SELECT "id" FROM json_populate_record(NULL::"public"."devices", $1::json))
//! ```

use anyhow::{Context, Result};
use replica_sink::ReplicaSink;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use sync_core::{Record, TrackedEntity, Value};
use tokio::sync::{Mutex, RwLock};
use tokio_postgres::types::ToSql;
use tokio_postgres::Client;
use tracing::{debug, warn};

use crate::catalog;
use crate::connect::{quote_ident, PgEndpoint};

/// `"schema"."table"`
fn qualified(entity: &TrackedEntity) -> String {
    format!(
        "{}.{}",
        quote_ident(&entity.schema),
        quote_ident(&entity.name)
    )
}

/// Build the upsert statement for the given columns (in order).
///
/// When only the primary key is present there is nothing to overwrite and
/// the conflict clause becomes `DO NOTHING`.
pub fn upsert_statement<'a>(
    entity: &TrackedEntity,
    columns: impl IntoIterator<Item = &'a str>,
) -> String {
    let table = qualified(entity);
    let columns: Vec<&str> = columns.into_iter().collect();
    let column_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    let updates = columns
        .iter()
        .filter(|c| **c != entity.primary_key)
        .map(|c| {
            let c = quote_ident(c);
            format!("{c} = EXCLUDED.{c}")
        })
        .collect::<Vec<_>>();

    let on_conflict = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };

    format!(
        "INSERT INTO {table} ({column_list}) SELECT {column_list} FROM json_populate_record(NULL::{table}, $1::json) ON CONFLICT ({}) {on_conflict}",
        quote_ident(&entity.primary_key)
    )
}

/// Build the delete-by-primary-key statement.
pub fn delete_statement(entity: &TrackedEntity) -> String {
    let table = qualified(entity);
    let pk = quote_ident(&entity.primary_key);
    format!(
        "DELETE FROM {table} WHERE {pk} = (SELECT {pk} FROM json_populate_record(NULL::{table}, $1::json))"
    )
}

/// JSON object bound for `json_populate_record`.
///
/// Text values of `json_columns` are parsed into the documents they hold.
pub fn bound_image(row: &Record, json_columns: &HashSet<String>) -> Result<serde_json::Value> {
    let mut object = serde_json::Map::with_capacity(row.len());
    for (column, value) in row.iter() {
        let bound = match value {
            Value::Text(text) if json_columns.contains(column) => serde_json::from_str(text)
                .with_context(|| format!("Column {column} does not hold a JSON document"))?,
            other => other.to_json(),
        };
        object.insert(column.to_string(), bound);
    }
    Ok(serde_json::Value::Object(object))
}

/// [`ReplicaSink`] writing to a PostgreSQL replica.
///
/// The client is shared by all entity consumers; tokio-postgres pipelines
/// concurrent statements over the one connection.
pub struct PostgresSink {
    endpoint: PgEndpoint,
    client: RwLock<Arc<Client>>,
    json_columns: Mutex<HashMap<String, Arc<HashSet<String>>>>,
}

impl PostgresSink {
    /// Connect to the replica.
    pub async fn connect(endpoint: PgEndpoint) -> Result<Self> {
        let client = endpoint.connect().await?;
        Ok(Self {
            endpoint,
            client: RwLock::new(Arc::new(client)),
            json_columns: Mutex::new(HashMap::new()),
        })
    }

    /// The current connection, reopened first if it has closed.
    pub async fn client(&self) -> Result<Arc<Client>> {
        let client = Arc::clone(&*self.client.read().await);
        if client.is_closed() {
            return self.reconnect(&client).await;
        }
        Ok(client)
    }

    /// Replace `stale` with a new connection. A consumer that finds the
    /// connection already replaced uses the new one.
    async fn reconnect(&self, stale: &Arc<Client>) -> Result<Arc<Client>> {
        let mut current = self.client.write().await;
        if !Arc::ptr_eq(&*current, stale) && !current.is_closed() {
            return Ok(Arc::clone(&*current));
        }
        warn!("Replica connection closed, reconnecting");
        let client = Arc::new(
            self.endpoint
                .connect()
                .await
                .context("Failed to reconnect to the replica")?,
        );
        *current = Arc::clone(&client);
        Ok(client)
    }

    /// Execute `statement`, retrying once on a new connection when the
    /// current one turns out to be closed.
    async fn execute(&self, statement: &str, params: &[&(dyn ToSql + Sync)]) -> Result<u64> {
        let client = self.client().await?;
        match client.execute(statement, params).await {
            Err(e) if e.is_closed() || client.is_closed() => {
                debug!("Statement failed on a closed connection: {e}");
                let client = self.reconnect(&client).await?;
                Ok(client.execute(statement, params).await?)
            }
            result => Ok(result?),
        }
    }

    async fn json_columns(&self, entity: &TrackedEntity) -> Result<Arc<HashSet<String>>> {
        let mut cache = self.json_columns.lock().await;
        if let Some(columns) = cache.get(&entity.name) {
            return Ok(Arc::clone(columns));
        }
        let client = self.client().await?;
        let columns =
            Arc::new(catalog::json_columns(&client, &entity.schema, &entity.name).await?);
        cache.insert(entity.name.clone(), Arc::clone(&columns));
        Ok(columns)
    }
}

#[async_trait::async_trait]
impl ReplicaSink for PostgresSink {
    async fn upsert(&self, entity: &TrackedEntity, row: &Record) -> Result<()> {
        let statement = upsert_statement(entity, row.column_names());
        debug!("Upsert into {}: {}", entity.name, statement);

        let image = bound_image(row, &*self.json_columns(entity).await?)?;
        self.execute(&statement, &[&image])
            .await
            .with_context(|| format!("Upsert into {} failed", entity.name))?;
        Ok(())
    }

    async fn delete(&self, entity: &TrackedEntity, key: &Value) -> Result<u64> {
        let statement = delete_statement(entity);
        let mut image = Record::new();
        image.insert(entity.primary_key.clone(), key.clone());

        let deleted = self
            .execute(&statement, &[&image.to_json()])
            .await
            .with_context(|| format!("Delete from {} failed", entity.name))?;
        Ok(deleted)
    }

    async fn temporal_columns(&self, entity: &TrackedEntity) -> Result<HashSet<String>> {
        let client = self.client().await?;
        catalog::temporal_columns(&client, &entity.schema, &entity.name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices() -> TrackedEntity {
        TrackedEntity::new("devices", "public", "ome")
    }

    #[test]
    fn test_upsert_statement_overwrites_non_key_columns() {
        let sql = upsert_statement(&devices(), ["id", "service_tag", "updated_at"]);
        assert_eq!(
            sql,
            "INSERT INTO \"public\".\"devices\" (\"id\", \"service_tag\", \"updated_at\") \
             SELECT \"id\", \"service_tag\", \"updated_at\" \
             FROM json_populate_record(NULL::\"public\".\"devices\", $1::json) \
             ON CONFLICT (\"id\") DO UPDATE SET \"service_tag\" = EXCLUDED.\"service_tag\", \
             \"updated_at\" = EXCLUDED.\"updated_at\""
        );
    }

    #[test]
    fn test_upsert_statement_key_only_does_nothing_on_conflict() {
        let sql = upsert_statement(&devices(), ["id"]);
        assert!(sql.ends_with("ON CONFLICT (\"id\") DO NOTHING"));
    }

    #[test]
    fn test_upsert_statement_custom_primary_key() {
        let entity = devices().with_primary_key("device_id");
        let sql = upsert_statement(&entity, ["device_id", "id"]);
        assert!(sql.contains("ON CONFLICT (\"device_id\") DO UPDATE SET \"id\" = EXCLUDED.\"id\""));
    }

    #[test]
    fn test_bound_image_parses_json_columns() {
        let row: Record = [
            ("id", Value::from(1)),
            ("doc", Value::from(r#"{"a":1,"tags":["x"]}"#)),
            ("note", Value::from(r#"{"a":1}"#)),
            ("extra", Value::Null),
        ]
        .into_iter()
        .collect();
        let json_columns: HashSet<String> = ["doc".to_string(), "extra".to_string()].into();

        let image = bound_image(&row, &json_columns).unwrap();
        assert_eq!(
            image,
            serde_json::json!({
                "id": 1,
                "doc": {"a": 1, "tags": ["x"]},
                "note": "{\"a\":1}",
                "extra": null,
            })
        );
    }

    #[test]
    fn test_bound_image_rejects_invalid_json_document() {
        let row: Record = [("id", Value::from(1)), ("doc", Value::from("{not json"))]
            .into_iter()
            .collect();
        let json_columns: HashSet<String> = ["doc".to_string()].into();
        let err = bound_image(&row, &json_columns).unwrap_err();
        assert!(err.to_string().contains("doc"));
    }

    #[test]
    fn test_delete_statement() {
        assert_eq!(
            delete_statement(&devices()),
            "DELETE FROM \"public\".\"devices\" WHERE \"id\" = \
             (SELECT \"id\" FROM json_populate_record(NULL::\"public\".\"devices\", $1::json))"
        );
    }
}
