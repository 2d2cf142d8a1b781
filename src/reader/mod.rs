//! Database handle layer for sqlview
//!
//! A [`SqliteReader`] wraps one connection to one session database file. It
//! is opened per request and closed when dropped, so every exit path of a
//! handler releases the file.
//!
//! # Access modes
//!
//! - [`AccessMode::ReadOnly`] is used for SELECT statements and browsing
//! - [`AccessMode::ReadWrite`] is used for everything that mutates; foreign
//!   key enforcement is switched on for these handles
//!
//! Neither mode creates a missing file: [`SqliteReader::create`] is the only
//! way to bring a new database into existence.
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlview::reader::{AccessMode, SqliteReader};
//!
//! let mut reader = SqliteReader::open(&path, AccessMode::ReadWrite)?;
//! let changed = reader.with_transaction(|tx| {
//!     Ok(tx.execute("DELETE FROM users WHERE id = ?1", [7])?)
//! })?;
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, Transaction};
use serde_json::{Map, Value};

use crate::mutation::quote_identifier;
use crate::schema::{self, ColumnDescriptor};
use crate::{Result, SqlviewError};

pub mod value;

/// How long a handle waits on another writer's lock before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether a handle may modify the database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

/// One page of rows from a table
#[derive(Debug, Clone)]
pub struct TablePage {
    /// Introspected columns of the table
    pub columns: Vec<ColumnDescriptor>,
    /// Rows on this page, keyed by column name
    pub rows: Vec<Map<String, Value>>,
    /// Number of rows in the whole table
    pub total_rows: usize,
}

/// An open connection to a session database
pub struct SqliteReader {
    conn: Connection,
    path: PathBuf,
    mode: AccessMode,
}

impl SqliteReader {
    /// Open an existing database file
    ///
    /// The schema header is read immediately, so a missing, truncated or
    /// non-SQLite file fails here with `SqlviewError::DatabaseUnavailable`
    /// instead of partway through a statement.
    pub fn open(path: &Path, mode: AccessMode) -> Result<Self> {
        if !path.is_file() {
            return Err(SqlviewError::DatabaseUnavailable(format!(
                "database file not found: {}",
                path.display()
            )));
        }

        let flags = match mode {
            AccessMode::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY,
            AccessMode::ReadWrite => OpenFlags::SQLITE_OPEN_READ_WRITE,
        } | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(path, flags).map_err(unavailable)?;
        conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(unavailable)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        if mode == AccessMode::ReadWrite {
            conn.pragma_update(None, "foreign_keys", true)?;
        }

        tracing::debug!(path = %path.display(), ?mode, "Opened database");
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            mode,
        })
    }

    /// Create a new, empty database file and open it read-write
    pub fn create(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        // Writing the header page makes the file a valid database on disk.
        conn.pragma_update(None, "user_version", 0)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            mode: AccessMode::ReadWrite,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside `BEGIN … COMMIT`
    ///
    /// If `f` fails the transaction is rolled back and the original error is
    /// returned; a failing rollback is logged but never masks that error.
    pub fn with_transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let tx = self.conn.transaction()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %rollback_err,
                        "Rollback failed"
                    );
                }
                Err(err)
            }
        }
    }

    /// Fetch one page of a table's rows (1-based `page`)
    pub fn fetch_page(&self, table: &str, page: usize, limit: usize) -> Result<TablePage> {
        schema::ensure_table_exists(&self.conn, table)?;
        let columns = schema::describe_table(&self.conn, table)?;
        let quoted = quote_identifier(table);

        let total_rows: i64 =
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", quoted), [], |row| {
                    row.get(0)
                })?;

        // A page past what SQLite can address is simply past the end.
        let offset = page
            .saturating_sub(1)
            .checked_mul(limit)
            .and_then(|offset| i64::try_from(offset).ok());
        let Some(offset) = offset else {
            return Ok(TablePage {
                columns,
                rows: Vec::new(),
                total_rows: total_rows.max(0) as usize,
            });
        };
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut stmt = self
            .conn
            .prepare(&format!("SELECT * FROM {} LIMIT ?1 OFFSET ?2", quoted))?;
        let names = value::column_names(&stmt);
        let rows = stmt
            .query_map([limit, offset], |row| {
                value::row_to_object(row, &names)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(TablePage {
            columns,
            rows,
            total_rows: total_rows.max(0) as usize,
        })
    }
}

fn unavailable(err: rusqlite::Error) -> SqlviewError {
    SqlviewError::DatabaseUnavailable(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_database() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
             INSERT INTO users (name) VALUES ('Alice'), ('Bob'), ('Carol'), ('Dave'), ('Eve');",
        )
        .unwrap();
        (dir, path)
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = SqliteReader::open(&dir.path().join("nope.db"), AccessMode::ReadOnly)
            .err()
            .unwrap();
        assert!(matches!(err, SqlviewError::DatabaseUnavailable(_)));
        assert!(!dir.path().join("nope.db").exists());
    }

    #[test]
    fn test_open_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.db");
        std::fs::write(&path, vec![0x42u8; 4096]).unwrap();
        let err = SqliteReader::open(&path, AccessMode::ReadWrite).err().unwrap();
        assert!(matches!(err, SqlviewError::DatabaseUnavailable(_)));
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let (_dir, path) = seeded_database();
        let reader = SqliteReader::open(&path, AccessMode::ReadOnly).unwrap();
        assert!(reader
            .connection()
            .execute("DELETE FROM users", [])
            .is_err());
    }

    #[test]
    fn test_create_writes_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh");
        drop(SqliteReader::create(&path).unwrap());
        let reader = SqliteReader::open(&path, AccessMode::ReadOnly).unwrap();
        assert!(schema::list_tables(reader.connection()).unwrap().is_empty());
    }

    #[test]
    fn test_transaction_commits() {
        let (_dir, path) = seeded_database();
        let mut reader = SqliteReader::open(&path, AccessMode::ReadWrite).unwrap();
        let changed = reader
            .with_transaction(|tx| Ok(tx.execute("DELETE FROM users WHERE id = 1", [])?))
            .unwrap();
        assert_eq!(changed, 1);
        let count: i64 = reader
            .connection()
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 4);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let (_dir, path) = seeded_database();
        let mut reader = SqliteReader::open(&path, AccessMode::ReadWrite).unwrap();
        let result: Result<()> = reader.with_transaction(|tx| {
            tx.execute("DELETE FROM users", [])?;
            Err(SqlviewError::InternalError("boom".into()))
        });
        assert!(matches!(result, Err(SqlviewError::InternalError(msg)) if msg == "boom"));
        let count: i64 = reader
            .connection()
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 5);
    }

    #[test]
    fn test_fetch_page() {
        let (_dir, path) = seeded_database();
        let reader = SqliteReader::open(&path, AccessMode::ReadOnly).unwrap();

        let page = reader.fetch_page("users", 2, 2).unwrap();
        assert_eq!(page.total_rows, 5);
        assert_eq!(page.columns.len(), 2);
        assert_eq!(page.rows.len(), 2);
        assert_eq!(page.rows[0]["name"], "Carol");

        let last = reader.fetch_page("users", 3, 2).unwrap();
        assert_eq!(last.rows.len(), 1);

        let beyond = reader.fetch_page("users", 10, 2).unwrap();
        assert!(beyond.rows.is_empty());
    }

    #[test]
    fn test_fetch_page_huge_page_is_empty() {
        let (_dir, path) = seeded_database();
        let reader = SqliteReader::open(&path, AccessMode::ReadOnly).unwrap();

        let page = reader.fetch_page("users", usize::MAX, 2).unwrap();
        assert!(page.rows.is_empty());
        assert_eq!(page.total_rows, 5);
        assert_eq!(page.columns.len(), 2);

        let wide = reader.fetch_page("users", 1, usize::MAX).unwrap();
        assert_eq!(wide.rows.len(), 5);
    }

    #[test]
    fn test_fetch_page_unknown_table() {
        let (_dir, path) = seeded_database();
        let reader = SqliteReader::open(&path, AccessMode::ReadOnly).unwrap();
        assert!(matches!(
            reader.fetch_page("ghosts", 1, 10),
            Err(SqlviewError::TableNotFound(_))
        ));
    }
}
