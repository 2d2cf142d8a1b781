//! SQL gateway for user-submitted statements
//!
//! The gateway accepts exactly one SQL statement and runs it against a
//! session database:
//!
//! 1. Empty input is rejected.
//! 2. Input with more than one non-empty `;`-separated segment is rejected.
//!    This is a guard against statement stacking, not a parser: a `;` inside
//!    a string literal is also counted.
//! 3. The statement is classified by its leading keyword. Only SELECT,
//!    UPDATE, DELETE, INSERT and CREATE are accepted.
//! 4. SELECT runs on a read-only handle and is capped at `max_rows` rows
//!    while still counting the full result. Everything else runs on a
//!    read-write handle inside `BEGIN … COMMIT`, rolled back on error.
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlview::gateway::SqlGateway;
//!
//! let gateway = SqlGateway::default();
//! let outcome = gateway.execute(&path, "SELECT * FROM users")?;
//! println!("{}", outcome.message());
//! ```

use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::reader::{value, AccessMode, SqliteReader};
use crate::{Result, SqlviewError};

/// Maximum number of rows a SELECT returns to the client
pub const MAX_SELECT_ROWS: usize = 1000;

// ============================================================================
// Classification
// ============================================================================

/// Category of a submitted statement, derived from its leading keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryType {
    Select,
    Update,
    Delete,
    Insert,
    Create,
}

impl QueryType {
    /// Classify a statement by its case-insensitive leading keyword
    pub fn classify(sql: &str) -> Result<Self> {
        static LEADING_KEYWORD: OnceLock<Regex> = OnceLock::new();
        let re = LEADING_KEYWORD
            .get_or_init(|| Regex::new(r"^\s*([A-Za-z]+)").expect("valid keyword regex"));

        let keyword = re
            .captures(sql)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_ascii_uppercase())
            .ok_or_else(|| SqlviewError::UnsupportedQueryType("(none)".to_string()))?;

        match keyword.as_str() {
            "SELECT" => Ok(QueryType::Select),
            "UPDATE" => Ok(QueryType::Update),
            "DELETE" => Ok(QueryType::Delete),
            "INSERT" => Ok(QueryType::Insert),
            "CREATE" => Ok(QueryType::Create),
            _ => Err(SqlviewError::UnsupportedQueryType(keyword)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Select => "SELECT",
            QueryType::Update => "UPDATE",
            QueryType::Delete => "DELETE",
            QueryType::Insert => "INSERT",
            QueryType::Create => "CREATE",
        }
    }

    /// Handle mode needed to run this kind of statement
    pub fn access_mode(&self) -> AccessMode {
        match self {
            QueryType::Select => AccessMode::ReadOnly,
            _ => AccessMode::ReadWrite,
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated, classified single statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedQuery {
    pub query_type: QueryType,
    /// The statement with surrounding whitespace and trailing `;` removed
    pub statement: String,
}

/// Validate and classify raw SQL input
pub fn prepare(sql: &str) -> Result<PreparedQuery> {
    if sql.trim().is_empty() {
        return Err(SqlviewError::InvalidInput(
            "SQL query is required".to_string(),
        ));
    }
    let statement = single_statement(sql)?;
    let query_type = QueryType::classify(statement)?;
    Ok(PreparedQuery {
        query_type,
        statement: statement.to_string(),
    })
}

/// Return the only non-empty `;`-separated segment of `sql`
pub fn single_statement(sql: &str) -> Result<&str> {
    let mut segments = sql.split(';').map(str::trim).filter(|s| !s.is_empty());
    match (segments.next(), segments.next()) {
        (Some(only), None) => Ok(only),
        (Some(_), Some(_)) => Err(SqlviewError::MultiStatementRejected),
        (None, _) => Err(SqlviewError::InvalidInput(
            "SQL query is required".to_string(),
        )),
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Rows produced by a SELECT
#[derive(Debug, Clone, PartialEq)]
pub struct SelectOutcome {
    /// At most `max_rows` rows, keyed by column name
    pub rows: Vec<Map<String, Value>>,
    /// Result column names; empty when no row was returned
    pub columns: Vec<String>,
    /// Number of rows the full, uncapped result contains
    pub total_rows: usize,
    pub has_more_rows: bool,
}

/// Summary of a mutating statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationOutcome {
    pub query_type: QueryType,
    pub affected_rows: usize,
    /// Rowid of the last inserted row, for INSERT statements only
    pub last_insert_rowid: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlOutcome {
    Select(SelectOutcome),
    Mutation(MutationOutcome),
}

impl SqlOutcome {
    pub fn query_type(&self) -> QueryType {
        match self {
            SqlOutcome::Select(_) => QueryType::Select,
            SqlOutcome::Mutation(outcome) => outcome.query_type,
        }
    }

    /// Human-readable summary shown next to the results
    pub fn message(&self) -> String {
        match self {
            SqlOutcome::Select(outcome) if outcome.has_more_rows => format!(
                "Query returned {} rows; showing the first {}",
                outcome.total_rows,
                outcome.rows.len()
            ),
            SqlOutcome::Select(outcome) => {
                format!("Query returned {} row(s)", outcome.total_rows)
            }
            SqlOutcome::Mutation(outcome) => match outcome.query_type {
                QueryType::Insert => format!("{} row(s) inserted", outcome.affected_rows),
                QueryType::Update => format!("{} row(s) updated", outcome.affected_rows),
                QueryType::Delete => format!("{} row(s) deleted", outcome.affected_rows),
                _ => "Statement executed successfully".to_string(),
            },
        }
    }
}

// ============================================================================
// Execution
// ============================================================================

/// Executes single statements against session database files
#[derive(Debug, Clone, Copy)]
pub struct SqlGateway {
    max_rows: usize,
}

impl Default for SqlGateway {
    fn default() -> Self {
        Self::new(MAX_SELECT_ROWS)
    }
}

impl SqlGateway {
    /// Create a gateway returning at most `max_rows` rows per SELECT
    pub fn new(max_rows: usize) -> Self {
        Self {
            max_rows: max_rows.max(1),
        }
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Validate, classify and run `sql` against the database at `path`
    ///
    /// The handle opened here is dropped before returning on every path.
    pub fn execute(&self, path: &Path, sql: &str) -> Result<SqlOutcome> {
        let prepared = prepare(sql)?;
        tracing::debug!(
            query_type = %prepared.query_type,
            chars = prepared.statement.len(),
            "Executing SQL"
        );

        let mut reader = SqliteReader::open(path, prepared.query_type.access_mode())?;
        match prepared.query_type {
            QueryType::Select => {
                select_rows(reader.connection(), &prepared.statement, self.max_rows)
                    .map(SqlOutcome::Select)
            }
            query_type => reader
                .with_transaction(|tx| {
                    // Stepped as a query so a RETURNING clause is accepted; its rows are discarded.
                    {
                        let mut stmt = tx.prepare(&prepared.statement)?;
                        let mut rows = stmt.query([])?;
                        while rows.next()?.is_some() {}
                    }
                    let affected_rows = tx.changes() as usize;
                    let last_insert_rowid =
                        (query_type == QueryType::Insert).then(|| tx.last_insert_rowid());
                    Ok(MutationOutcome {
                        query_type,
                        affected_rows,
                        last_insert_rowid,
                    })
                })
                .map(SqlOutcome::Mutation),
        }
    }
}

/// Run a query, keeping the first `max_rows` rows and counting the rest
pub(crate) fn select_rows(
    conn: &Connection,
    statement: &str,
    max_rows: usize,
) -> Result<SelectOutcome> {
    let mut stmt = conn.prepare(statement)?;
    let names = value::column_names(&stmt);

    let mut rows = stmt.query([])?;
    let mut kept = Vec::new();
    let mut total_rows = 0usize;
    while let Some(row) = rows.next()? {
        if total_rows < max_rows {
            kept.push(value::row_to_object(row, &names)?);
        }
        total_rows += 1;
    }

    // Duplicate result names collapse into one key per row, so columns follow the row keys.
    let columns = kept
        .first()
        .map(|row| row.keys().cloned().collect())
        .unwrap_or_default();
    Ok(SelectOutcome {
        rows: kept,
        columns,
        total_rows,
        has_more_rows: total_rows > max_rows,
    })
}
