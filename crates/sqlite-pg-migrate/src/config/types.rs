//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (SQLite).
    pub source: SourceConfig,

    /// Target database configuration (PostgreSQL).
    pub target: TargetConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Source database (SQLite) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,
}

/// Target database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Namespace holding the destination tables (default: "content").
    #[serde(default = "default_content_schema")]
    pub schema: String,

    /// SSL mode (default: "disable").
    #[serde(default = "default_disable")]
    pub ssl_mode: String,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Maximum rows per batch (default: 500).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Log progress every this many migrated rows (default: 1000).
    #[serde(default = "default_progress_interval")]
    pub progress_interval: i64,

    /// Tables to migrate, in migration order. A table must come after
    /// every table it references.
    #[serde(default = "default_tables")]
    pub tables: Vec<TableDescriptor>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            progress_interval: default_progress_interval(),
            tables: default_tables(),
        }
    }
}

/// Declared type of a destination field, used for value normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    Text,
    Date,
    Float,
}

/// Static metadata for one migrated table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Source table name.
    pub name: String,

    /// Destination table name, if different from the source name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Destination columns. Empty means every source column is written.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,

    /// Fields that accept NULL at the destination.
    #[serde(default)]
    pub nullable: Vec<String>,

    /// Declared field types. Fields not listed are `text`.
    #[serde(default)]
    pub field_types: BTreeMap<String, FieldType>,

    /// Primary key column used for conflict detection (default: "id").
    #[serde(default = "default_primary_key")]
    pub primary_key: String,

    /// Tables this table references by foreign key.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
}

impl TableDescriptor {
    /// Create a descriptor with defaults for everything but the name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: None,
            columns: Vec::new(),
            nullable: Vec::new(),
            field_types: BTreeMap::new(),
            primary_key: default_primary_key(),
            references: Vec::new(),
        }
    }

    pub fn with_nullable(mut self, fields: &[&str]) -> Self {
        self.nullable = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_field_type(mut self, field: &str, field_type: FieldType) -> Self {
        self.field_types.insert(field.to_string(), field_type);
        self
    }

    pub fn with_references(mut self, tables: &[&str]) -> Self {
        self.references = tables.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Destination table name.
    pub fn target_name(&self) -> &str {
        self.target.as_deref().unwrap_or(&self.name)
    }

    /// Declared type of a field, `text` when undeclared.
    pub fn field_type(&self, field: &str) -> FieldType {
        self.field_types.get(field).copied().unwrap_or_default()
    }

    pub fn is_nullable(&self, field: &str) -> bool {
        self.nullable.iter().any(|f| f == field)
    }

    /// Pick the columns to write, keeping the source's column order.
    pub fn write_columns(&self, source_columns: &[String]) -> Vec<String> {
        if self.columns.is_empty() {
            return source_columns.to_vec();
        }
        source_columns
            .iter()
            .filter(|c| self.columns.contains(c))
            .cloned()
            .collect()
    }
}

/// The movie catalogue tables in dependency order.
pub fn default_tables() -> Vec<TableDescriptor> {
    vec![
        TableDescriptor::new("genre")
            .with_nullable(&["description"])
            .with_field_type("description", FieldType::Text),
        TableDescriptor::new("person"),
        TableDescriptor::new("film_work")
            .with_nullable(&["description", "creation_date", "file_path", "rating"])
            .with_field_type("creation_date", FieldType::Date)
            .with_field_type("rating", FieldType::Float)
            .with_field_type("description", FieldType::Text),
        TableDescriptor::new("genre_film_work").with_references(&["film_work", "genre"]),
        TableDescriptor::new("person_film_work").with_references(&["film_work", "person"]),
    ]
}

// Default value functions for serde
fn default_pg_port() -> u16 {
    5432
}

fn default_content_schema() -> String {
    "content".to_string()
}

fn default_disable() -> String {
    "disable".to_string()
}

fn default_batch_size() -> usize {
    500
}

fn default_progress_interval() -> i64 {
    1000
}

fn default_primary_key() -> String {
    "id".to_string()
}
