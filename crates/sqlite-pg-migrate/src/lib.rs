//! # sqlite-pg-migrate
//!
//! Idempotent migration of the movie catalogue from SQLite to PostgreSQL.
//!
//! Tables are copied one after another in dependency order, in batches of
//! bounded size. Each batch is written in a single transaction and rows
//! whose primary key already exists are skipped, so a run can be repeated
//! safely. After the run, row counts on both sides are compared.
//!
//! ## Example
//!
//! ```rust,no_run
//! use sqlite_pg_migrate::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> sqlite_pg_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let result = orchestrator.run(false).await?;
//!     println!("Migrated {} rows", result.rows_transferred);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod orchestrator;
pub mod source;
pub mod target;
pub mod transform;
pub mod verify;

// Re-exports for convenient access
pub use config::{
    Config, FieldType, MigrationConfig, SourceConfig, TableDescriptor, TargetConfig,
};
pub use core::{Batch, BatchStream, Row, SourceReader, SqlValue, TargetWriter};
pub use error::{MigrateError, Result};
pub use orchestrator::{
    health_check, HealthCheckResult, MigrationEvent, MigrationResult, Orchestrator, SkipReason,
    TableOutcome, TableStatus,
};
pub use source::SqliteReader;
pub use target::{PgWriter, SslMode};
pub use verify::{ConsistencyReport, TableConsistency};
