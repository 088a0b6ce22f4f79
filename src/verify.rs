//! Reconciliation between source and replica.
//!
//! Compares per-entity row counts and, for a sample of rows, every temporal
//! column. Discrepancies are reported, never treated as failures.

use anyhow::{Context, Result};
use replica_sync_postgresql::{catalog, quote_ident};
use std::collections::{BTreeMap, HashSet};
use sync_core::TrackedEntity;
use tokio_postgres::Client;
use tracing::{info, warn};

/// Largest difference, in seconds, still counted as a match.
pub const TIMESTAMP_TOLERANCE_SECS: f64 = 1.0;

/// Rows per entity sampled for the temporal comparison.
pub const DEFAULT_SAMPLE_SIZE: i64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountComparison {
    pub entity: String,
    pub source: i64,
    pub replica: i64,
}

impl CountComparison {
    pub fn matches(&self) -> bool {
        self.source == self.replica
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemporalMismatch {
    pub entity: String,
    pub id: String,
    pub column: String,
    /// Seconds since the epoch; `None` when the replica row or value is missing
    pub source: Option<f64>,
    pub replica: Option<f64>,
}

/// Sampled temporal values of one entity: primary key text → one value per column.
pub type TemporalSample = BTreeMap<String, Vec<Option<f64>>>;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReconciliationReport {
    pub counts: Vec<CountComparison>,
    pub temporal_checked: usize,
    pub temporal_matched: usize,
    pub mismatches: Vec<TemporalMismatch>,
    /// Entities whose queries failed
    pub skipped: Vec<String>,
}

impl ReconciliationReport {
    /// Percentage of compared temporal values that matched.
    pub fn accuracy(&self) -> Option<f64> {
        if self.temporal_checked == 0 {
            return None;
        }
        Some(self.temporal_matched as f64 / self.temporal_checked as f64 * 100.0)
    }

    pub fn is_consistent(&self) -> bool {
        self.counts.iter().all(CountComparison::matches)
            && self.mismatches.is_empty()
            && self.skipped.is_empty()
    }

    pub fn log(&self) {
        let (mut source_total, mut replica_total) = (0, 0);
        for count in &self.counts {
            source_total += count.source;
            replica_total += count.replica;
            if count.matches() {
                info!("  {:<25} {:>10}", count.entity, count.source);
            } else {
                warn!(
                    "  {:<25} {:>10} source, {} replica",
                    count.entity, count.source, count.replica
                );
            }
        }
        info!("  {:<25} {:>10} source, {} replica", "TOTAL", source_total, replica_total);

        for m in &self.mismatches {
            warn!(
                "  MISMATCH {} id={} col={}: source={:?} replica={:?}",
                m.entity, m.id, m.column, m.source, m.replica
            );
        }
        match self.accuracy() {
            Some(accuracy) => info!(
                "  Timestamps: {}/{} matched ({accuracy:.1}% accuracy)",
                self.temporal_matched, self.temporal_checked
            ),
            None => info!("  No temporal values to compare"),
        }
        for entity in &self.skipped {
            warn!("  Skipped {entity}");
        }
    }

    /// Fold the sampled temporal values of one entity into the report.
    ///
    /// Values that are null on the source are not compared.
    pub fn compare_temporal(
        &mut self,
        entity: &str,
        columns: &[String],
        source: &TemporalSample,
        replica: &TemporalSample,
    ) {
        for (id, source_values) in source {
            let replica_values = replica.get(id);
            for (i, column) in columns.iter().enumerate() {
                let Some(source_value) = source_values.get(i).copied().flatten() else {
                    continue;
                };
                let replica_value = replica_values.and_then(|v| v.get(i).copied().flatten());
                self.temporal_checked += 1;
                match replica_value {
                    Some(r) if (source_value - r).abs() <= TIMESTAMP_TOLERANCE_SECS => {
                        self.temporal_matched += 1;
                    }
                    _ => self.mismatches.push(TemporalMismatch {
                        entity: entity.to_string(),
                        id: id.clone(),
                        column: column.clone(),
                        source: Some(source_value),
                        replica: replica_value,
                    }),
                }
            }
        }
    }
}

fn sample_select(entity: &TrackedEntity, columns: &[String]) -> String {
    let mut select = format!("{}::text", quote_ident(&entity.primary_key));
    for column in columns {
        select.push_str(&format!(
            ", EXTRACT(EPOCH FROM {})::float8",
            quote_ident(column)
        ));
    }
    format!(
        "SELECT {select} FROM {}.{}",
        quote_ident(&entity.schema),
        quote_ident(&entity.name)
    )
}

/// The first `limit` rows by primary key.
pub fn source_sample_query(entity: &TrackedEntity, columns: &[String], limit: i64) -> String {
    format!(
        "{} ORDER BY {} LIMIT {limit}",
        sample_select(entity, columns),
        quote_ident(&entity.primary_key)
    )
}

/// The rows whose primary key text is in `$1`.
pub fn replica_sample_query(entity: &TrackedEntity, columns: &[String]) -> String {
    format!(
        "{} WHERE {}::text = ANY($1)",
        sample_select(entity, columns),
        quote_ident(&entity.primary_key)
    )
}

fn to_sample(rows: &[tokio_postgres::Row], columns: usize) -> TemporalSample {
    rows.iter()
        .map(|row| {
            let id: String = row.get(0);
            let values = (1..=columns).map(|i| row.get::<_, Option<f64>>(i)).collect();
            (id, values)
        })
        .collect()
}

async fn temporal_sample(
    source: &Client,
    replica: &Client,
    entity: &TrackedEntity,
    columns: &[String],
    sample_size: i64,
) -> Result<(TemporalSample, TemporalSample)> {
    let source_rows = source
        .query(&source_sample_query(entity, columns, sample_size), &[])
        .await
        .with_context(|| format!("Failed to sample {} on the source", entity.name))?;
    let source_sample = to_sample(&source_rows, columns.len());

    let ids: Vec<String> = source_sample.keys().cloned().collect();
    let replica_rows = replica
        .query(&replica_sample_query(entity, columns), &[&ids])
        .await
        .with_context(|| format!("Failed to sample {} on the replica", entity.name))?;
    Ok((source_sample, to_sample(&replica_rows, columns.len())))
}

async fn reconcile_entity(
    report: &mut ReconciliationReport,
    source: &Client,
    replica: &Client,
    entity: &TrackedEntity,
    sample_size: i64,
) -> Result<()> {
    let source_count = catalog::count_rows(source, &entity.schema, &entity.name).await?;
    let replica_count = catalog::count_rows(replica, &entity.schema, &entity.name).await?;
    report.counts.push(CountComparison {
        entity: entity.name.clone(),
        source: source_count,
        replica: replica_count,
    });

    let columns: HashSet<String> =
        catalog::temporal_columns(source, &entity.schema, &entity.name).await?;
    if columns.is_empty() || sample_size <= 0 {
        return Ok(());
    }
    let mut columns: Vec<String> = columns.into_iter().collect();
    columns.sort();

    let (source_sample, replica_sample) =
        temporal_sample(source, replica, entity, &columns, sample_size).await?;
    report.compare_temporal(&entity.name, &columns, &source_sample, &replica_sample);
    Ok(())
}

/// Compare every entity on both sides. Query failures skip the entity.
pub async fn reconcile(
    source: &Client,
    replica: &Client,
    entities: &[TrackedEntity],
    sample_size: i64,
) -> ReconciliationReport {
    let mut report = ReconciliationReport::default();
    for entity in entities {
        if let Err(e) = reconcile_entity(&mut report, source, replica, entity, sample_size).await {
            warn!(table = %entity.name, "Reconciliation skipped: {e:#}");
            report.skipped.push(entity.name.clone());
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(rows: Vec<(&str, Vec<Option<f64>>)>) -> TemporalSample {
        rows.into_iter()
            .map(|(id, values)| (id.to_string(), values))
            .collect()
    }

    #[test]
    fn test_queries() {
        let entity = TrackedEntity::new("devices", "public", "ome");
        let columns = vec!["created_at".to_string(), "updated_at".to_string()];
        assert_eq!(
            source_sample_query(&entity, &columns, 5),
            "SELECT \"id\"::text, EXTRACT(EPOCH FROM \"created_at\")::float8, \
             EXTRACT(EPOCH FROM \"updated_at\")::float8 FROM \"public\".\"devices\" \
             ORDER BY \"id\" LIMIT 5"
        );
        assert!(replica_sample_query(&entity, &columns).ends_with("WHERE \"id\"::text = ANY($1)"));
    }

    #[test]
    fn test_temporal_tolerance() {
        let columns = vec!["created_at".to_string(), "updated_at".to_string()];
        let source = sample(vec![
            ("1", vec![Some(1_700_000_000.0), Some(1_700_000_060.0)]),
            ("2", vec![Some(1_700_000_000.0), None]),
            ("3", vec![Some(1_700_000_000.0), Some(1_700_000_000.0)]),
        ]);
        let replica = sample(vec![
            ("1", vec![Some(1_700_000_000.4), Some(1_700_000_061.0)]),
            ("2", vec![Some(1_699_999_990.0), Some(1_700_000_000.0)]),
        ]);

        let mut report = ReconciliationReport::default();
        report.compare_temporal("devices", &columns, &source, &replica);

        // Row 2's null source value is not compared; row 3 is missing on the replica.
        assert_eq!(report.temporal_checked, 5);
        assert_eq!(report.temporal_matched, 2);
        assert_eq!(report.mismatches.len(), 3);
        assert_eq!(report.mismatches[0].id, "2");
        assert_eq!(report.mismatches[0].column, "created_at");
        assert_eq!(report.mismatches[1].id, "3");
        assert_eq!(report.mismatches[1].replica, None);
        assert_eq!(report.accuracy(), Some(40.0));
        assert!(!report.is_consistent());
    }

    #[test]
    fn test_counts() {
        let report = ReconciliationReport {
            counts: vec![CountComparison {
                entity: "alerts".to_string(),
                source: 10,
                replica: 10,
            }],
            ..Default::default()
        };
        assert!(report.is_consistent());
        assert_eq!(report.accuracy(), None);

        let behind = CountComparison {
            entity: "alerts".to_string(),
            source: 11,
            replica: 10,
        };
        assert!(!behind.matches());
    }
}
