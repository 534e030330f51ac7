//! Configuration validation.

use super::{Config, FieldType};
use crate::error::{MigrateError, Result};
use crate::target::SslMode;
use std::collections::HashSet;
use tracing::warn;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.path.as_os_str().is_empty() {
        return Err(MigrateError::Config("source.path is required".into()));
    }

    // Target validation
    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }
    if config.target.schema.is_empty() {
        return Err(MigrateError::Config("target.schema is required".into()));
    }
    SslMode::parse(&config.target.ssl_mode)?;

    // Migration config validation
    if config.migration.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if config.migration.progress_interval < 1 {
        return Err(MigrateError::Config(
            "migration.progress_interval must be at least 1".into(),
        ));
    }

    validate_order(config)
}

/// Every table must appear after the tables it references.
fn validate_order(config: &Config) -> Result<()> {
    let mut seen: HashSet<&str> = HashSet::new();

    for table in &config.migration.tables {
        if table.name.is_empty() {
            return Err(MigrateError::Config(
                "migration.tables entries need a name".into(),
            ));
        }
        if table.primary_key.is_empty() {
            return Err(MigrateError::Config(format!(
                "table {} has an empty primary_key",
                table.name
            )));
        }
        if !table.columns.is_empty() && !table.columns.contains(&table.primary_key) {
            return Err(MigrateError::Config(format!(
                "table {} declares columns without its primary key {}",
                table.name, table.primary_key
            )));
        }
        for referenced in &table.references {
            if !seen.contains(referenced.as_str()) {
                return Err(MigrateError::Config(format!(
                    "table {} references {} which is not migrated before it",
                    table.name, referenced
                )));
            }
        }
        for (field, field_type) in &table.field_types {
            if *field_type != FieldType::Text && !table.is_nullable(field) {
                warn!(
                    "{}.{} is typed {:?} but not listed as nullable; blank values become NULL",
                    table.name, field, field_type
                );
            }
        }
        if !seen.insert(table.name.as_str()) {
            return Err(MigrateError::Config(format!(
                "table {} is listed more than once",
                table.name
            )));
        }
    }

    Ok(())
}
