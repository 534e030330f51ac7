//! SQLite source reader.
//!
//! Holds one long-lived read-only connection. Batches are produced by a
//! blocking task that owns the statement cursor and hands rows over a
//! bounded channel, so only the batch in flight is held in memory.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::config::{SourceConfig, TableDescriptor};
use crate::core::{Batch, BatchStream, Row, SourceReader, SqlValue};
use crate::error::{MigrateError, Result};

/// SQLite implementation of [`SourceReader`].
#[derive(Debug)]
pub struct SqliteReader {
    conn: Arc<Mutex<Connection>>,
    declared: BTreeSet<String>,
}

impl SqliteReader {
    /// Open the source database read-only.
    ///
    /// Only tables named in `tables` are ever reported by
    /// [`list_tables`](SourceReader::list_tables).
    pub fn open(config: &SourceConfig, tables: &[TableDescriptor]) -> Result<Self> {
        let path = config.path.as_path();
        if !path.exists() {
            return Err(MigrateError::Config(format!(
                "source database not found: {}",
                path.display()
            )));
        }
        if !is_sqlite_file(path) {
            return Err(MigrateError::Config(format!(
                "source is not a SQLite database: {}",
                path.display()
            )));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        info!("Opened SQLite source: {}", path.display());

        Ok(Self::from_connection(conn, tables))
    }

    /// Wrap an already open connection.
    pub fn from_connection(conn: Connection, tables: &[TableDescriptor]) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            declared: tables.iter().map(|t| t.name.clone()).collect(),
        }
    }

    /// Run a trivial query to check the connection.
    pub fn test_connection(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    /// Run a query on the blocking pool so the runtime thread never waits
    /// on the connection lock.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await?
    }
}

#[async_trait]
impl SourceReader for SqliteReader {
    async fn list_tables(&self) -> BTreeSet<String> {
        match self.with_conn(query_tables).await {
            Ok(names) => names
                .into_iter()
                .filter(|name| self.declared.contains(name))
                .collect(),
            Err(e) => {
                error!("Error getting table names: {}", e);
                BTreeSet::new()
            }
        }
    }

    async fn columns(&self, table: &str) -> Vec<String> {
        let name = table.to_string();
        self.with_conn(move |conn| query_columns(conn, &name))
            .await
            .unwrap_or_else(|e| {
                error!("Error getting columns from {}: {}", table, e);
                Vec::new()
            })
    }

    async fn row_count(&self, table: &str) -> i64 {
        let name = table.to_string();
        self.with_conn(move |conn| query_row_count(conn, &name))
            .await
            .unwrap_or_else(|e| {
                error!("Error getting count from {}: {}", table, e);
                0
            })
    }

    fn read_batches(&self, table: &str, batch_size: usize) -> BatchStream {
        let (tx, rx) = mpsc::channel(1);
        let conn = self.conn.clone();
        let table = table.to_string();
        let batch_size = batch_size.max(1);

        tokio::task::spawn_blocking(move || {
            if let Err(e) = stream_table(&conn, &table, batch_size, &tx) {
                error!("Error loading data from {}: {}", table, e);
                let _ = tx.blocking_send(Err(MigrateError::source_stream(&table, e.to_string())));
            }
        });

        rx
    }

    fn db_type(&self) -> &str {
        "sqlite"
    }
}

/// Walk the table cursor and send full batches as they fill up.
///
/// Returns early without error if the receiver went away.
fn stream_table(
    conn: &Mutex<Connection>,
    table: &str,
    batch_size: usize,
    tx: &mpsc::Sender<Result<Batch>>,
) -> rusqlite::Result<()> {
    let conn = conn.lock();
    let sql = format!("SELECT * FROM {}", quote_ident(table));
    let mut stmt = conn.prepare(&sql)?;
    let column_count = stmt.column_count();
    let mut rows = stmt.query([])?;

    let mut current: Vec<Row> = Vec::with_capacity(batch_size);
    let mut sent = 0usize;

    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(column_count);
        for i in 0..column_count {
            values.push(to_sql_value(row.get_ref(i)?));
        }
        current.push(values);

        if current.len() == batch_size {
            let full = std::mem::replace(&mut current, Vec::with_capacity(batch_size));
            if tx.blocking_send(Ok(Batch::new(full))).is_err() {
                debug!("{}: reader dropped, stopping after {} batches", table, sent);
                return Ok(());
            }
            sent += 1;
        }
    }

    if !current.is_empty() {
        let _ = tx.blocking_send(Ok(Batch::new(current)));
        sent += 1;
    }

    debug!("{}: no more rows to read ({} batches)", table, sent);
    Ok(())
}

fn query_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names)
}

fn query_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let sql = format!("PRAGMA table_info({})", quote_ident(table));
    let mut stmt = conn.prepare(&sql)?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(columns)
}

fn query_row_count(conn: &Connection, table: &str) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
    Ok(conn.query_row(&sql, [], |row| row.get::<_, i64>(0))?)
}

fn to_sql_value(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(f) => SqlValue::Real(f),
        ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
    }
}

/// Quote a SQLite identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Whether `path` looks like a SQLite database file. A zero-length file is
/// an empty database to SQLite.
fn is_sqlite_file(path: &Path) -> bool {
    use std::io::Read;

    if std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(false) {
        return true;
    }

    let mut header = [0u8; 16];
    std::fs::File::open(path)
        .and_then(|mut f| f.read_exact(&mut header))
        .map(|_| &header == b"SQLite format 3\0")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_tables;
    use tempfile::TempDir;

    fn fixture(genres: usize) -> (TempDir, SourceConfig) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.sqlite");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE genre (id TEXT PRIMARY KEY, name TEXT NOT NULL, description TEXT);
             CREATE TABLE unrelated (id INTEGER);",
        )
        .unwrap();
        for i in 0..genres {
            conn.execute(
                "INSERT INTO genre (id, name, description) VALUES (?1, ?2, NULL)",
                rusqlite::params![format!("g{:04}", i), format!("Genre {}", i)],
            )
            .unwrap();
        }
        (dir, SourceConfig { path })
    }

    async fn collect(mut stream: BatchStream) -> Vec<Result<Batch>> {
        let mut out = Vec::new();
        while let Some(item) = stream.recv().await {
            out.push(item);
        }
        out
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("genre"), "\"genre\"");
        assert_eq!(quote_ident("gen\"re"), "\"gen\"\"re\"");
    }

    #[test]
    fn test_open_missing_file_fails() {
        let config = SourceConfig {
            path: "does/not/exist.sqlite".into(),
        };
        assert!(SqliteReader::open(&config, &default_tables()).is_err());
    }

    #[test]
    fn test_open_rejects_non_sqlite_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "genre,person,film_work\n").unwrap();

        let err = SqliteReader::open(&SourceConfig { path }, &default_tables()).unwrap_err();
        assert!(err.to_string().contains("not a SQLite database"));
    }

    #[tokio::test]
    async fn test_zero_length_file_is_an_empty_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.sqlite");
        std::fs::File::create(&path).unwrap();

        let reader = SqliteReader::open(&SourceConfig { path }, &default_tables()).unwrap();
        assert!(reader.list_tables().await.is_empty());
        assert_eq!(reader.row_count("genre").await, 0);
    }

    #[tokio::test]
    async fn test_counts_while_another_table_streams() {
        let (_dir, config) = fixture(3);
        let reader = SqliteReader::open(&config, &default_tables()).unwrap();

        let mut stream = reader.read_batches("genre", 1);
        let first = stream.recv().await.unwrap().unwrap();
        assert_eq!(first.len(), 1);
        // the producer now holds the connection, blocked on the full channel
        let count = tokio::spawn(async move {
            let n = reader.row_count("genre").await;
            (reader, n)
        });
        let mut rest = 0;
        while let Some(batch) = stream.recv().await {
            rest += batch.unwrap().len();
        }
        let (_reader, n) = count.await.unwrap();
        assert_eq!(rest, 2);
        assert_eq!(n, 3);
    }

    #[tokio::test]
    async fn test_list_tables_only_declared() {
        let (_dir, config) = fixture(1);
        let reader = SqliteReader::open(&config, &default_tables()).unwrap();
        assert!(is_sqlite_file(&config.path));

        let tables = reader.list_tables().await;
        assert_eq!(tables.into_iter().collect::<Vec<_>>(), ["genre"]);
    }

    #[tokio::test]
    async fn test_columns_and_count() {
        let (_dir, config) = fixture(3);
        let reader = SqliteReader::open(&config, &default_tables()).unwrap();

        assert_eq!(reader.columns("genre").await, ["id", "name", "description"]);
        assert_eq!(reader.row_count("genre").await, 3);
    }

    #[tokio::test]
    async fn test_missing_table_degrades() {
        let (_dir, config) = fixture(0);
        let reader = SqliteReader::open(&config, &default_tables()).unwrap();

        assert!(reader.columns("person").await.is_empty());
        assert_eq!(reader.row_count("person").await, 0);
    }

    #[tokio::test]
    async fn test_exact_batch_size_is_one_batch() {
        let (_dir, config) = fixture(5);
        let reader = SqliteReader::open(&config, &default_tables()).unwrap();

        let batches = collect(reader.read_batches("genre", 5)).await;
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].as_ref().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_one_over_batch_size_is_two_batches() {
        let (_dir, config) = fixture(6);
        let reader = SqliteReader::open(&config, &default_tables()).unwrap();

        let batches = collect(reader.read_batches("genre", 5)).await;
        let sizes: Vec<usize> = batches.iter().map(|b| b.as_ref().unwrap().len()).collect();
        assert_eq!(sizes, [5, 1]);
    }

    #[tokio::test]
    async fn test_rows_keep_source_order_and_types() {
        let (_dir, config) = fixture(3);
        let reader = SqliteReader::open(&config, &default_tables()).unwrap();

        let batches = collect(reader.read_batches("genre", 10)).await;
        let batch = batches.into_iter().next().unwrap().unwrap();
        let ids: Vec<&SqlValue> = batch.rows.iter().map(|r| &r[0]).collect();
        assert_eq!(
            ids,
            [&SqlValue::from("g0000"), &SqlValue::from("g0001"), &SqlValue::from("g0002")]
        );
        assert_eq!(batch.rows[0][2], SqlValue::Null);
    }

    #[tokio::test]
    async fn test_stream_of_missing_table_yields_error() {
        let (_dir, config) = fixture(0);
        let reader = SqliteReader::open(&config, &default_tables()).unwrap();

        let items = collect(reader.read_batches("person", 10)).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(MigrateError::SourceStream { .. })));
    }
}
