//! Tracked entity configuration.
//!
//! Entities come either from `--tables a,b,c` or from a TOML file:
//!
//! ```toml
//! [[entity]]
//! name = "devices"
//!
//! [[entity]]
//! name = "group_memberships"
//! primary_key = "membership_id"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use sync_core::TrackedEntity;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EntitiesFile {
    #[serde(default)]
    entity: Vec<EntityEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EntityEntry {
    name: String,
    primary_key: Option<String>,
}

/// Parse the TOML form into `(name, primary_key)` pairs.
pub fn parse_entities_toml(content: &str) -> Result<Vec<(String, Option<String>)>> {
    let file: EntitiesFile = toml::from_str(content).context("Invalid entities file")?;
    Ok(file
        .entity
        .into_iter()
        .map(|e| (e.name, e.primary_key))
        .collect())
}

/// Build the tracked entity list from the file (if given) or the table list.
///
/// Order is preserved; empty and duplicate names are rejected.
pub fn resolve_entities(
    tables: &[String],
    entities_file: Option<&Path>,
    schema: &str,
    topic_prefix: &str,
) -> Result<Vec<TrackedEntity>> {
    let entries = match entities_file {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read entities file {}", path.display()))?;
            parse_entities_toml(&content)
                .with_context(|| format!("Failed to load {}", path.display()))?
        }
        None => tables
            .iter()
            .map(|t| (t.trim().to_string(), None))
            .collect(),
    };

    if entries.is_empty() {
        anyhow::bail!("No tracked entities configured; pass --tables or --entities-file");
    }

    let mut seen = HashSet::new();
    entries
        .into_iter()
        .map(|(name, primary_key)| {
            if name.is_empty() {
                anyhow::bail!("Entity names must not be empty");
            }
            if !seen.insert(name.clone()) {
                anyhow::bail!("Entity {name} is listed more than once");
            }
            let entity = TrackedEntity::new(name, schema, topic_prefix);
            Ok(match primary_key {
                Some(pk) => entity.with_primary_key(pk),
                None => entity,
            })
        })
        .collect()
}
