//! Schema introspection
//!
//! Every function here queries the live database. Nothing is cached, so the
//! results always reflect DDL run earlier in the same session.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::{Result, SqlviewError};

/// One column of a table, as reported by `PRAGMA table_info`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub name: String,
    /// Declared type; empty when the column was declared without one
    #[serde(rename = "type")]
    pub declared_type: String,
    pub not_null: bool,
    /// Default value expression as written in the schema
    pub default_value: Option<String>,
    pub primary_key: bool,
    /// 1-based position within the primary key, 0 when not part of it
    #[serde(skip)]
    pub pk_position: i64,
}

/// Names of the user tables in the database, sorted
pub fn list_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
}

/// Whether a table with this name exists (SQLite names are case-insensitive)
pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
            params![table],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn ensure_table_exists(conn: &Connection, table: &str) -> Result<()> {
    if table_exists(conn, table)? {
        Ok(())
    } else {
        Err(SqlviewError::TableNotFound(table.to_string()))
    }
}

/// Describe the columns of a table in declaration order
pub fn describe_table(conn: &Connection, table: &str) -> Result<Vec<ColumnDescriptor>> {
    let mut stmt = conn.prepare(
        "SELECT name, type, \"notnull\", dflt_value, pk
         FROM pragma_table_info(?1)
         ORDER BY cid",
    )?;
    let columns = stmt
        .query_map(params![table], |row| {
            let pk_position: i64 = row.get(4)?;
            Ok(ColumnDescriptor {
                name: row.get(0)?,
                declared_type: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                not_null: row.get::<_, i64>(2)? != 0,
                default_value: row.get(3)?,
                primary_key: pk_position > 0,
                pk_position,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns)
}

/// Look a column up by name, case-insensitively
pub fn find_column<'a>(
    columns: &'a [ColumnDescriptor],
    table: &str,
    name: &str,
) -> Result<&'a ColumnDescriptor> {
    columns
        .iter()
        .find(|column| column.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| SqlviewError::ColumnNotFound {
            table: table.to_string(),
            column: name.to_string(),
        })
}

/// Primary key columns in key order
pub fn primary_key(columns: &[ColumnDescriptor]) -> Vec<&ColumnDescriptor> {
    let mut key: Vec<_> = columns.iter().filter(|c| c.primary_key).collect();
    key.sort_by_key(|c| c.pk_position);
    key
}

/// The `INTEGER PRIMARY KEY` column aliasing the rowid, if the table has one
///
/// Only a single-column key declared exactly as `INTEGER` is an alias;
/// SQLite assigns its value automatically when it is omitted.
pub fn rowid_alias(columns: &[ColumnDescriptor]) -> Option<&ColumnDescriptor> {
    match primary_key(columns).as_slice() {
        [only] if only.declared_type.eq_ignore_ascii_case("INTEGER") => Some(*only),
        _ => None,
    }
}
