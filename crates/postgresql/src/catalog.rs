//! Replica catalog queries.

use anyhow::{Context, Result};
use std::collections::HashSet;
use tokio_postgres::Client;

use crate::connect::quote_ident;

/// `information_schema.columns.data_type` values treated as temporal.
pub const TEMPORAL_DATA_TYPES: [&str; 3] = [
    "timestamp without time zone",
    "timestamp with time zone",
    "date",
];

/// `information_schema.columns.data_type` values holding JSON documents.
pub const JSON_DATA_TYPES: [&str; 2] = ["json", "jsonb"];

/// Names of the columns of `schema.table` whose data type is one of `data_types`.
///
/// An unknown table yields an empty set.
pub async fn columns_of_types(
    client: &Client,
    schema: &str,
    table: &str,
    data_types: &[&str],
) -> Result<HashSet<String>> {
    let data_types = data_types
        .iter()
        .map(|t| format!("'{t}'"))
        .collect::<Vec<_>>()
        .join(", ");
    let query = format!(
        "SELECT column_name::text
        FROM information_schema.columns
        WHERE table_schema::text = $1
          AND table_name::text = $2
          AND data_type::text IN ({data_types})"
    );

    let rows = client
        .query(&query, &[&schema, &table])
        .await
        .with_context(|| format!("Failed to read column types of {schema}.{table}"))?;

    Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
}

/// Names of the temporal columns of `schema.table`.
pub async fn temporal_columns(
    client: &Client,
    schema: &str,
    table: &str,
) -> Result<HashSet<String>> {
    columns_of_types(client, schema, table, &TEMPORAL_DATA_TYPES).await
}

/// Names of the `json` / `jsonb` columns of `schema.table`.
pub async fn json_columns(client: &Client, schema: &str, table: &str) -> Result<HashSet<String>> {
    columns_of_types(client, schema, table, &JSON_DATA_TYPES).await
}

/// `SELECT COUNT(*)` of `schema.table`.
pub async fn count_rows(client: &Client, schema: &str, table: &str) -> Result<i64> {
    let query = format!(
        "SELECT COUNT(*) FROM {}.{}",
        quote_ident(schema),
        quote_ident(table)
    );
    let row = client
        .query_one(&query, &[])
        .await
        .with_context(|| format!("Failed to count rows of {schema}.{table}"))?;
    Ok(row.get(0))
}
