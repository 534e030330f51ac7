//! Post-migration consistency check.
//!
//! Compares per-table row counts between the source and the target.
//! A mismatch is reported, never repaired.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::core::{SourceReader, TargetWriter};

/// Row counts of one table on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConsistency {
    pub table: String,
    pub source_count: i64,
    pub target_count: i64,
    pub matches: bool,
}

impl TableConsistency {
    pub fn new(table: impl Into<String>, source_count: i64, target_count: i64) -> Self {
        Self {
            table: table.into(),
            source_count,
            target_count,
            matches: source_count == target_count,
        }
    }
}

/// Result of comparing every migrated table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub tables: Vec<TableConsistency>,
}

impl ConsistencyReport {
    /// True when every checked table matches.
    pub fn is_consistent(&self) -> bool {
        self.tables.iter().all(|t| t.matches)
    }

    /// Tables whose counts differ.
    pub fn mismatches(&self) -> impl Iterator<Item = &TableConsistency> {
        self.tables.iter().filter(|t| !t.matches)
    }

    pub fn get(&self, table: &str) -> Option<&TableConsistency> {
        self.tables.iter().find(|t| t.table == table)
    }
}

/// Compare counts for every declared table present in the source.
pub async fn check_consistency(
    config: &Config,
    source: &dyn SourceReader,
    target: &dyn TargetWriter,
) -> ConsistencyReport {
    info!("Testing data consistency...");

    let present = source.list_tables().await;
    let mut report = ConsistencyReport::default();

    for table in config
        .migration
        .tables
        .iter()
        .filter(|t| present.contains(&t.name))
    {
        let source_count = source.row_count(&table.name).await;
        let target_count = target.row_count(table).await;
        let entry = TableConsistency::new(&table.name, source_count, target_count);

        if entry.matches {
            info!("✓ {}: {} records (consistent)", entry.table, target_count);
        } else {
            warn!(
                "✗ {}: source={}, target={} (inconsistent)",
                entry.table, source_count, target_count
            );
        }
        report.tables.push(entry);
    }

    info!("Data consistency test completed");
    report
}
