//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source database (SQLite) open or query error
    #[error("Source database error: {0}")]
    Source(#[from] rusqlite::Error),

    /// Target database connection or query error
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Reading batches failed part-way through a table
    #[error("Reading table {table} failed: {message}")]
    SourceStream { table: String, message: String },

    /// A batch write was rejected and rolled back
    #[error("Writing batch to {table} failed: {message}")]
    TargetWrite { table: String, message: String },

    /// A blocking source query task panicked or was cancelled
    #[error("Source task failed: {0}")]
    SourceTask(#[from] tokio::task::JoinError),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    /// Create a SourceStream error
    pub fn source_stream(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::SourceStream {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a TargetWrite error
    pub fn target_write(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::TargetWrite {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 1,
            MigrateError::Source(_)
            | MigrateError::SourceStream { .. }
            | MigrateError::SourceTask(_) => 2,
            MigrateError::Target(_) | MigrateError::TargetWrite { .. } => 3,
            MigrateError::Json(_) => 6,
            MigrateError::Io(_) => 7,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(MigrateError::Config("x".into()).exit_code(), 1);
        assert_eq!(MigrateError::source_stream("genre", "boom").exit_code(), 2);
        assert_eq!(MigrateError::target_write("genre", "boom").exit_code(), 3);
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(MigrateError::from(io).exit_code(), 7);
    }

    #[tokio::test]
    async fn test_panicked_source_task_is_a_source_error() {
        let join = tokio::spawn(async { panic!("query thread died") })
            .await
            .unwrap_err();
        let err = MigrateError::from(join);
        assert!(matches!(err, MigrateError::SourceTask(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_format_detailed_includes_message() {
        let err = MigrateError::target_write("content.genre", "duplicate key");
        let text = err.format_detailed();
        assert!(text.starts_with("Error: Writing batch to content.genre failed"));
        assert!(text.contains("duplicate key"));
    }
}
