//! Core traits for the migration engine.
//!
//! - [`SourceReader`]: enumerates and streams tables from the source store
//! - [`TargetWriter`]: idempotent batched writes into the destination store

use std::collections::BTreeSet;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::TableDescriptor;
use crate::error::Result;

use super::value::Batch;

/// Lazy, finite, non-restartable stream of batches for one table.
pub type BatchStream = mpsc::Receiver<Result<Batch>>;

/// Read tables from the source store.
///
/// Enumeration methods never fail: read errors are logged and degrade to
/// "nothing there" so the orchestrator skips the table. Only
/// [`read_batches`](SourceReader::read_batches) reports errors, because a
/// failure part-way through a table must abort the migration.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Tables that exist in the source and are declared in configuration.
    async fn list_tables(&self) -> BTreeSet<String>;

    /// Column names of a table in source order. Empty if unreadable.
    async fn columns(&self, table: &str) -> Vec<String>;

    /// Row count of a table, 0 if unreadable.
    async fn row_count(&self, table: &str) -> i64;

    /// Start streaming rows of `table` in chunks of `batch_size`.
    ///
    /// Every batch except possibly the last holds exactly `batch_size`
    /// rows. Rows keep the store's native order. A read error is yielded
    /// as an `Err` item and ends the stream.
    fn read_batches(&self, table: &str, batch_size: usize) -> BatchStream;

    /// Get the database type identifier.
    fn db_type(&self) -> &str;
}

/// Write rows into the destination store.
#[async_trait]
pub trait TargetWriter: Send + Sync {
    /// Insert a batch, silently skipping rows whose primary key exists.
    ///
    /// Values are normalized per the descriptor's field types before
    /// writing. The batch is committed as one unit: on error nothing from
    /// the batch is kept and the error is returned. Returns the number of
    /// rows actually inserted.
    async fn write_idempotent(
        &self,
        table: &TableDescriptor,
        columns: &[String],
        batch: Batch,
    ) -> Result<u64>;

    /// Row count of the destination table, 0 if unreadable.
    async fn row_count(&self, table: &TableDescriptor) -> i64;

    /// Get the database type identifier.
    fn db_type(&self) -> &str;
}
