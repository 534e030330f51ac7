//! Migration orchestrator - main workflow coordinator.
//!
//! Tables are migrated strictly one after another, in configured order, one
//! batch at a time. The first failed batch aborts the whole run.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::{Config, TableDescriptor};
use crate::core::{SourceReader, TargetWriter};
use crate::error::Result;
use crate::source::SqliteReader;
use crate::target::PgWriter;
use crate::verify::{self, ConsistencyReport};

/// Per-table migration state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Pending,
    Skipped,
    InProgress,
    Completed,
    Failed,
}

/// Why a table was not migrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Declared but absent from the source.
    NotInSource,
    /// No readable columns.
    NoColumns,
    /// Zero source rows.
    Empty,
}

/// Outcome of one table within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableOutcome {
    pub table: String,
    pub status: TableStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    pub source_rows: i64,
    /// Rows read from the source and handed to the writer.
    pub rows_migrated: i64,
    /// Rows the writer actually inserted (the rest already existed).
    pub rows_inserted: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_rows: Option<i64>,
}

impl TableOutcome {
    fn pending(table: &str) -> Self {
        Self {
            table: table.to_string(),
            status: TableStatus::Pending,
            skip_reason: None,
            source_rows: 0,
            rows_migrated: 0,
            rows_inserted: 0,
            target_rows: None,
        }
    }
}

/// Progress notifications, for callers that want more than log lines.
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationEvent {
    TableSkipped {
        table: String,
        reason: SkipReason,
    },
    TableStarted {
        table: String,
        source_rows: i64,
    },
    BatchWritten {
        table: String,
        rows: usize,
        inserted: u64,
    },
    Progress {
        table: String,
        migrated: i64,
        total: i64,
    },
    TableCompleted {
        table: String,
        migrated: i64,
        target_rows: i64,
    },
    TableFailed {
        table: String,
        error: String,
    },
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status ("completed" or "dry_run").
    pub status: String,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,

    pub tables_total: usize,
    pub tables_completed: usize,
    pub tables_skipped: usize,

    /// Rows read and written across all tables.
    pub rows_transferred: i64,

    /// Rows newly inserted across all tables.
    pub rows_inserted: i64,

    /// Average throughput (rows/second).
    pub rows_per_second: i64,

    pub tables: Vec<TableOutcome>,
    pub consistency: ConsistencyReport,
}

impl MigrationResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn table(&self, name: &str) -> Option<&TableOutcome> {
        self.tables.iter().find(|t| t.table == name)
    }
}

/// Connection check result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub source_connected: bool,
    pub source_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_error: Option<String>,
    pub healthy: bool,
}

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
    events: Option<mpsc::UnboundedSender<MigrationEvent>>,
}

impl Orchestrator {
    /// Open the SQLite source and connect to the PostgreSQL target.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let source = SqliteReader::open(&config.source, &config.migration.tables)?;
        let target = PgWriter::connect(&config.target).await?;
        Ok(Self::with_backends(config, Arc::new(source), Arc::new(target)))
    }

    /// Build an orchestrator over explicit reader and writer.
    pub fn with_backends(
        config: Config,
        source: Arc<dyn SourceReader>,
        target: Arc<dyn TargetWriter>,
    ) -> Self {
        Self {
            config,
            source,
            target,
            events: None,
        }
    }

    /// Send per-table events to `tx` as the run progresses.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<MigrationEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn emit(&self, event: MigrationEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Run the migration.
    ///
    /// With `dry_run` the plan is resolved (which tables exist, their row
    /// counts) but nothing is written and no consistency check is made.
    pub async fn run(&self, dry_run: bool) -> Result<MigrationResult> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();

        info!(
            "Starting data migration {} from {} to {}",
            run_id,
            self.source.db_type(),
            self.target.db_type()
        );

        let present = self.source.list_tables().await;
        info!("Found tables in source: {:?}", present);

        let mut outcomes = Vec::with_capacity(self.config.migration.tables.len());
        for table in &self.config.migration.tables {
            let mut outcome = TableOutcome::pending(&table.name);
            if let Err(e) = self
                .migrate_table(table, &present, &mut outcome, dry_run)
                .await
            {
                outcome.status = TableStatus::Failed;
                error!(
                    "Failed to migrate {} after {} rows: {}",
                    table.name, outcome.rows_migrated, e
                );
                self.emit(MigrationEvent::TableFailed {
                    table: table.name.clone(),
                    error: e.to_string(),
                });
                error!("Data migration failed: {}", e);
                return Err(e);
            }
            outcomes.push(outcome);
        }

        let consistency = if dry_run {
            ConsistencyReport::default()
        } else {
            self.validate().await
        };

        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;
        let rows_transferred: i64 = outcomes.iter().map(|o| o.rows_migrated).sum();
        let rows_per_second = if duration > 0.0 {
            (rows_transferred as f64 / duration) as i64
        } else {
            0
        };

        let result = MigrationResult {
            run_id,
            status: if dry_run { "dry_run" } else { "completed" }.to_string(),
            started_at,
            completed_at,
            duration_seconds: duration,
            tables_total: outcomes.len(),
            tables_completed: count_status(&outcomes, TableStatus::Completed),
            tables_skipped: count_status(&outcomes, TableStatus::Skipped),
            rows_transferred,
            rows_inserted: outcomes.iter().map(|o| o.rows_inserted).sum(),
            rows_per_second,
            tables: outcomes,
            consistency,
        };

        info!(
            "Data migration {}: {} tables, {} rows in {:.1}s ({} rows/s)",
            result.status,
            result.tables_completed,
            result.rows_transferred,
            result.duration_seconds,
            result.rows_per_second
        );

        Ok(result)
    }

    /// Move one table. Skips leave `outcome` in `Skipped` and return Ok.
    async fn migrate_table(
        &self,
        table: &TableDescriptor,
        present: &BTreeSet<String>,
        outcome: &mut TableOutcome,
        dry_run: bool,
    ) -> Result<()> {
        let name = table.name.as_str();

        if !present.contains(name) {
            warn!("Table {} not found in source, skipping...", name);
            self.skip(outcome, SkipReason::NotInSource);
            return Ok(());
        }

        info!("Starting migration for table: {}", name);

        let columns = self.source.columns(name).await;
        if columns.is_empty() {
            error!("No columns found for {}, skipping...", name);
            self.skip(outcome, SkipReason::NoColumns);
            return Ok(());
        }

        let source_rows = self.source.row_count(name).await;
        outcome.source_rows = source_rows;
        info!("Total records in source {}: {}", name, source_rows);

        if source_rows == 0 {
            warn!("No data found in {}, skipping...", name);
            self.skip(outcome, SkipReason::Empty);
            return Ok(());
        }

        if dry_run {
            return Ok(());
        }

        outcome.status = TableStatus::InProgress;
        self.emit(MigrationEvent::TableStarted {
            table: name.to_string(),
            source_rows,
        });

        let interval = self.config.migration.progress_interval.max(1);
        let mut batches = self
            .source
            .read_batches(name, self.config.migration.batch_size);

        while let Some(batch) = batches.recv().await {
            let batch = batch?;
            let rows = batch.len();
            let inserted = self.target.write_idempotent(table, &columns, batch).await?;

            let before = outcome.rows_migrated;
            outcome.rows_migrated += rows as i64;
            outcome.rows_inserted += inserted as i64;
            self.emit(MigrationEvent::BatchWritten {
                table: name.to_string(),
                rows,
                inserted,
            });

            if outcome.rows_migrated / interval > before / interval {
                info!(
                    "Migrated {}/{} records from {}",
                    outcome.rows_migrated, source_rows, name
                );
                self.emit(MigrationEvent::Progress {
                    table: name.to_string(),
                    migrated: outcome.rows_migrated,
                    total: source_rows,
                });
            }
        }

        info!(
            "Finished migrating {} records from {}",
            outcome.rows_migrated, name
        );
        outcome.status = TableStatus::Completed;

        let target_rows = self.target.row_count(table).await;
        outcome.target_rows = Some(target_rows);
        if source_rows == target_rows {
            info!("✓ Successfully migrated {}: {} records", name, target_rows);
        } else {
            warn!(
                "⚠ Data inconsistency in {}: source={}, target={}",
                name, source_rows, target_rows
            );
        }

        self.emit(MigrationEvent::TableCompleted {
            table: name.to_string(),
            migrated: outcome.rows_migrated,
            target_rows,
        });
        Ok(())
    }

    fn skip(&self, outcome: &mut TableOutcome, reason: SkipReason) {
        outcome.status = TableStatus::Skipped;
        outcome.skip_reason = Some(reason);
        self.emit(MigrationEvent::TableSkipped {
            table: outcome.table.clone(),
            reason,
        });
    }

    /// Compare row counts between source and target.
    pub async fn validate(&self) -> ConsistencyReport {
        verify::check_consistency(&self.config, self.source.as_ref(), self.target.as_ref()).await
    }
}

fn count_status(outcomes: &[TableOutcome], status: TableStatus) -> usize {
    outcomes.iter().filter(|o| o.status == status).count()
}

/// Open both connections independently and time a trivial query on each.
pub async fn health_check(config: &Config) -> HealthCheckResult {
    let start = Instant::now();
    let source_error = SqliteReader::open(&config.source, &config.migration.tables)
        .and_then(|reader| reader.test_connection())
        .err()
        .map(|e| e.to_string());
    let source_latency_ms = start.elapsed().as_millis() as u64;

    let start = Instant::now();
    let target_error = match PgWriter::connect(&config.target).await {
        Ok(writer) => writer.test_connection().await.err().map(|e| e.to_string()),
        Err(e) => Some(e.to_string()),
    };
    let target_latency_ms = start.elapsed().as_millis() as u64;

    let source_connected = source_error.is_none();
    let target_connected = target_error.is_none();

    HealthCheckResult {
        source_connected,
        source_latency_ms,
        source_error,
        target_connected,
        target_latency_ms,
        target_error,
        healthy: source_connected && target_connected,
    }
}
