//! PostgreSQL target writer.
//!
//! Each batch is written in its own transaction: rows are COPYed into a
//! temporary staging table shaped like the destination table, then moved
//! with a single `INSERT ... SELECT ... ON CONFLICT (pk) DO NOTHING`. The
//! staging table is dropped on commit; on error the transaction rolls back
//! and nothing from the batch is kept.

mod tls;

pub use tls::SslMode;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::SinkExt;
use tokio::sync::Mutex;
use tokio_postgres::{Client, Config as PgConfig, NoTls};
use tracing::{debug, error, info};

use crate::config::{TableDescriptor, TargetConfig};
use crate::core::{Batch, SqlValue, TargetWriter};
use crate::error::{MigrateError, Result};
use crate::transform::normalize_row;

/// Connection timeout for the target database.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// PostgreSQL implementation of [`TargetWriter`].
///
/// Owns a single long-lived client. There is no pool: batches are written
/// one at a time.
pub struct PgWriter {
    client: Mutex<Client>,
    schema: String,
}

impl PgWriter {
    /// Connect to the target database.
    pub async fn connect(config: &TargetConfig) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(CONNECT_TIMEOUT);

        let client = match SslMode::parse(&config.ssl_mode)?.connector()? {
            None => {
                let (client, connection) = pg_config.connect(NoTls).await?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        error!("PostgreSQL connection error: {}", e);
                    }
                });
                client
            }
            Some(tls) => {
                let (client, connection) = pg_config.connect(tls).await?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        error!("PostgreSQL connection error: {}", e);
                    }
                });
                client
            }
        };

        client.simple_query("SELECT 1").await?;

        info!(
            "Connected to PostgreSQL target: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self {
            client: Mutex::new(client),
            schema: config.schema.clone(),
        })
    }

    /// Run a trivial query to check the connection.
    pub async fn test_connection(&self) -> Result<()> {
        let client = self.client.lock().await;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    async fn try_row_count(&self, qualified: &str) -> Result<i64> {
        let client = self.client.lock().await;
        let sql = format!("SELECT COUNT(*)::int8 FROM {}", qualified);
        let row = client.query_one(&sql, &[]).await?;
        Ok(row.get::<_, i64>(0))
    }
}

#[async_trait]
impl TargetWriter for PgWriter {
    async fn write_idempotent(
        &self,
        table: &TableDescriptor,
        columns: &[String],
        batch: Batch,
    ) -> Result<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let qualified = qualify_table(&self.schema, table.target_name());
        let write_columns = table.write_columns(columns);
        let row_count = batch.len();

        let statements = BatchStatements::new(&qualified, table, &write_columns);
        let data = encode_copy_text(table, columns, &write_columns, batch);

        let mut client = self.client.lock().await;
        let inserted = insert_batch(&mut client, &statements, data)
            .await
            .map_err(|e| {
                error!("Error saving batch to {}: {}", qualified, e);
                MigrateError::target_write(&qualified, e.to_string())
            })?;

        debug!(
            "Inserted {} rows into {} ({} already present)",
            inserted,
            qualified,
            row_count as u64 - inserted
        );
        Ok(inserted)
    }

    async fn row_count(&self, table: &TableDescriptor) -> i64 {
        let qualified = qualify_table(&self.schema, table.target_name());
        self.try_row_count(&qualified).await.unwrap_or_else(|e| {
            error!("Error getting count from {}: {}", qualified, e);
            0
        })
    }

    fn db_type(&self) -> &str {
        "postgres"
    }
}

/// SQL for one staged batch insert.
#[derive(Debug)]
struct BatchStatements {
    create_staging: String,
    copy: String,
    insert: String,
}

impl BatchStatements {
    fn new(qualified: &str, table: &TableDescriptor, columns: &[String]) -> Self {
        let staging = quote_ident(&format!("_staging_{}", table.target_name()));
        let col_list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");

        Self {
            create_staging: format!(
                "CREATE TEMP TABLE {} (LIKE {} INCLUDING DEFAULTS) ON COMMIT DROP",
                staging, qualified
            ),
            copy: format!(
                "COPY {} ({}) FROM STDIN WITH (FORMAT TEXT)",
                staging, col_list
            ),
            insert: format!(
                "INSERT INTO {} ({}) SELECT {} FROM {} ON CONFLICT ({}) DO NOTHING",
                qualified,
                col_list,
                col_list,
                staging,
                quote_ident(&table.primary_key)
            ),
        }
    }
}

/// Stage and insert one batch inside a transaction.
///
/// Dropping the transaction on any error rolls it back.
async fn insert_batch(
    client: &mut Client,
    statements: &BatchStatements,
    data: Bytes,
) -> std::result::Result<u64, tokio_postgres::Error> {
    let tx = client.transaction().await?;
    tx.batch_execute(&statements.create_staging).await?;

    let sink = tx.copy_in(&statements.copy).await?;
    tokio::pin!(sink);
    sink.send(data).await?;
    sink.finish().await?;

    let inserted = tx.execute(&statements.insert, &[]).await?;
    tx.commit().await?;
    Ok(inserted)
}

/// Normalize rows and encode the selected columns as COPY text.
fn encode_copy_text(
    table: &TableDescriptor,
    columns: &[String],
    write_columns: &[String],
    batch: Batch,
) -> Bytes {
    let positions: Vec<usize> = write_columns
        .iter()
        .filter_map(|c| columns.iter().position(|s| s == c))
        .collect();

    let mut buf = String::with_capacity(batch.len() * 128);
    for row in batch.rows {
        let row = normalize_row(table, columns, row);
        for (i, &pos) in positions.iter().enumerate() {
            if i > 0 {
                buf.push('\t');
            }
            buf.push_str(&value_to_text(&row[pos]));
        }
        buf.push('\n');
    }
    Bytes::from(buf)
}

/// Convert SqlValue to text for COPY.
fn value_to_text(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "\\N".to_string(),
        SqlValue::Integer(i) => i.to_string(),
        SqlValue::Real(f) => f.to_string(),
        SqlValue::Text(s) => escape_copy_text(s),
        SqlValue::Blob(b) => format!("\\\\x{}", hex::encode(b)),
    }
}

/// Escape text for PostgreSQL COPY.
fn escape_copy_text(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '\t' => result.push_str("\\t"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            _ => result.push(c),
        }
    }
    result
}

/// Quote a PostgreSQL identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Qualify a table name with schema.
fn qualify_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldType;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_escape_copy_text() {
        assert_eq!(escape_copy_text("hello"), "hello");
        assert_eq!(escape_copy_text("tab\there"), "tab\\there");
        assert_eq!(escape_copy_text("new\nline"), "new\\nline");
        assert_eq!(escape_copy_text("back\\slash"), "back\\\\slash");
    }

    #[test]
    fn test_value_to_text() {
        assert_eq!(value_to_text(&SqlValue::Null), "\\N");
        assert_eq!(value_to_text(&SqlValue::Integer(42)), "42");
        assert_eq!(value_to_text(&SqlValue::Real(8.5)), "8.5");
        assert_eq!(value_to_text(&SqlValue::Blob(vec![0xde, 0xad])), "\\\\xdead");
    }

    #[test]
    fn test_qualify_table() {
        assert_eq!(qualify_table("content", "genre"), "\"content\".\"genre\"");
    }

    #[test]
    fn test_statements_skip_on_primary_key_conflict() {
        let table = TableDescriptor::new("genre");
        let statements =
            BatchStatements::new("\"content\".\"genre\"", &table, &cols(&["id", "name"]));

        assert_eq!(
            statements.insert,
            "INSERT INTO \"content\".\"genre\" (\"id\", \"name\") SELECT \"id\", \"name\" \
             FROM \"_staging_genre\" ON CONFLICT (\"id\") DO NOTHING"
        );
        assert!(statements.create_staging.ends_with("ON COMMIT DROP"));
        assert!(statements.copy.starts_with("COPY \"_staging_genre\" (\"id\", \"name\")"));
    }

    #[test]
    fn test_encode_normalizes_blank_description_and_date() {
        let table = TableDescriptor::new("film_work")
            .with_field_type("creation_date", FieldType::Date)
            .with_field_type("description", FieldType::Text);
        let columns = cols(&["id", "description", "creation_date"]);
        let batch = Batch::new(vec![vec![
            SqlValue::from("f1"),
            SqlValue::Null,
            SqlValue::from(" "),
        ]]);

        let data = encode_copy_text(&table, &columns, &columns, batch);
        assert_eq!(&data[..], b"f1\t\t\\N\n");
    }

    #[test]
    fn test_encode_projects_declared_columns() {
        let mut table = TableDescriptor::new("person");
        table.columns = cols(&["full_name", "id"]);
        let columns = cols(&["id", "full_name", "legacy"]);
        let write_columns = table.write_columns(&columns);
        assert_eq!(write_columns, ["id", "full_name"]);

        let batch = Batch::new(vec![vec![
            SqlValue::from("p1"),
            SqlValue::from("Ann Lee"),
            SqlValue::Integer(9),
        ]]);
        let data = encode_copy_text(&table, &columns, &write_columns, batch);
        assert_eq!(&data[..], b"p1\tAnn Lee\n");
    }
}
