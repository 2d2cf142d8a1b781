//! Single-row insert, update and delete helpers
//!
//! Every mutation follows the same sequence:
//!
//! ```text
//! validate table → validate columns → BEGIN → precondition check → execute → COMMIT
//!                                              └──────── any error ────────→ ROLLBACK
//! ```
//!
//! Validation failures return before a transaction is opened.
//!
//! # Identifiers and parameters
//!
//! Table and column names cannot be bound as SQL parameters, so they are
//! interpolated through [`quote_identifier`] after being checked against the
//! live schema. Values are never interpolated: they always travel as bound
//! parameters in a [`Predicate`] or statement parameter list.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::reader::{value, SqliteReader};
use crate::schema::{self, ColumnDescriptor};
use crate::{Result, SqlviewError};

/// Quote a table or column name as an SQL identifier
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// ============================================================================
// Row identifiers
// ============================================================================

/// One `column = value` pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnValue {
    pub column: String,
    pub value: Value,
}

/// Predicate selecting the row an update or delete applies to
///
/// ```json
/// {"column": "id", "value": 7}
/// {"compositeIdentifier": [{"column": "order_id", "value": 1}, {"column": "line", "value": 2}]}
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RowIdentifier {
    Composite {
        #[serde(rename = "compositeIdentifier")]
        composite_identifier: Vec<ColumnValue>,
    },
    Single(ColumnValue),
}

impl RowIdentifier {
    /// The column/value pairs making up the identifier
    pub fn parts(&self) -> &[ColumnValue] {
        match self {
            RowIdentifier::Composite {
                composite_identifier,
            } => composite_identifier,
            RowIdentifier::Single(part) => std::slice::from_ref(part),
        }
    }

    /// Build the parameterized WHERE clause for this identifier
    pub fn predicate(&self) -> Result<Predicate> {
        Predicate::equality(self.parts())
    }

    /// Short description used in error messages, e.g. `id = 7`
    pub fn describe(&self) -> String {
        self.parts()
            .iter()
            .map(|part| format!("{} = {}", part.column, part.value))
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

/// A WHERE clause with `?` placeholders and the values bound to them
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub clause: String,
    pub params: Vec<SqlValue>,
}

impl Predicate {
    /// `"a" = ? AND "b" = ?`
    pub fn equality(parts: &[ColumnValue]) -> Result<Self> {
        Self::build(parts, "=")
    }

    /// `"a" IS ? AND "b" IS ?`, which also matches NULLs
    pub fn null_safe(parts: &[ColumnValue]) -> Result<Self> {
        Self::build(parts, "IS")
    }

    fn build(parts: &[ColumnValue], operator: &str) -> Result<Self> {
        if parts.is_empty() {
            return Err(SqlviewError::InvalidInput(
                "Row identifier must reference at least one column".to_string(),
            ));
        }
        let clause = parts
            .iter()
            .map(|part| format!("{} {} ?", quote_identifier(&part.column), operator))
            .collect::<Vec<_>>()
            .join(" AND ");
        let params = parts.iter().map(|part| value::to_sql(&part.value)).collect();
        Ok(Self { clause, params })
    }
}

// ============================================================================
// Insert
// ============================================================================

/// Result of inserting a row
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOutcome {
    /// `last_insert_rowid()` after the insert
    pub rowid: i64,
    /// The stored row, including defaults; `None` when it could not be reselected
    pub new_row: Option<Map<String, Value>>,
}

/// Insert one row into `table`
///
/// Every key of `row_data` must name an existing column, and every NOT NULL
/// column without a default (other than the rowid alias) must be supplied.
pub fn insert_row(
    reader: &mut SqliteReader,
    table: &str,
    row_data: &Map<String, Value>,
) -> Result<InsertOutcome> {
    schema::ensure_table_exists(reader.connection(), table)?;
    let columns = schema::describe_table(reader.connection(), table)?;
    for key in row_data.keys() {
        schema::find_column(&columns, table, key)?;
    }
    let missing = missing_required_fields(&columns, row_data);
    if !missing.is_empty() {
        return Err(SqlviewError::MissingRequiredField(missing));
    }

    let parts = to_parts(row_data);
    let quoted_table = quote_identifier(table);
    let sql = if parts.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", quoted_table)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quoted_table,
            parts
                .iter()
                .map(|part| quote_identifier(&part.column))
                .collect::<Vec<_>>()
                .join(", "),
            vec!["?"; parts.len()].join(", ")
        )
    };
    let params: Vec<SqlValue> = parts.iter().map(|part| value::to_sql(&part.value)).collect();

    reader.with_transaction(|tx| {
        tx.execute(&sql, params_from_iter(params.iter()))?;
        let rowid = tx.last_insert_rowid();
        let new_row = reselect_inserted(tx, table, &columns, &parts, rowid)?;
        Ok(InsertOutcome { rowid, new_row })
    })
}

/// Names of required columns absent from `row_data` or given as `null`
pub fn missing_required_fields(
    columns: &[ColumnDescriptor],
    row_data: &Map<String, Value>,
) -> Vec<String> {
    let alias = schema::rowid_alias(columns).map(|c| c.name.as_str());
    columns
        .iter()
        .filter(|c| c.not_null && c.default_value.is_none())
        .filter(|c| Some(c.name.as_str()) != alias)
        .filter(|c| {
            !row_data
                .iter()
                .any(|(key, value)| key.eq_ignore_ascii_case(&c.name) && !value.is_null())
        })
        .map(|c| c.name.clone())
        .collect()
}

fn to_parts(row_data: &Map<String, Value>) -> Vec<ColumnValue> {
    row_data
        .iter()
        .map(|(column, value)| ColumnValue {
            column: column.clone(),
            value: value.clone(),
        })
        .collect()
}

/// Read back the row an insert just created
///
/// With a primary key the row is fetched by the supplied key values, or by
/// the new rowid for an `INTEGER PRIMARY KEY`. Otherwise the most recent row
/// matching every inserted value is taken, which cannot distinguish exact
/// duplicates and yields `None` when the lookup fails.
fn reselect_inserted(
    conn: &Connection,
    table: &str,
    columns: &[ColumnDescriptor],
    inserted: &[ColumnValue],
    rowid: i64,
) -> Result<Option<Map<String, Value>>> {
    let key = schema::primary_key(columns);
    if !key.is_empty() {
        let supplied: Option<Vec<ColumnValue>> = key
            .iter()
            .map(|column| {
                inserted
                    .iter()
                    .find(|part| part.column.eq_ignore_ascii_case(&column.name))
                    .cloned()
            })
            .collect();
        let key_parts = supplied.or_else(|| {
            schema::rowid_alias(columns).map(|alias| {
                vec![ColumnValue {
                    column: alias.name.clone(),
                    value: Value::from(rowid),
                }]
            })
        });
        if let Some(key_parts) = key_parts {
            let predicate = Predicate::equality(&key_parts)?;
            return Ok(fetch_one(conn, table, &predicate, "")?);
        }
    }

    let lookup = if inserted.is_empty() {
        fetch_one(
            conn,
            table,
            &Predicate {
                clause: "rowid = ?".to_string(),
                params: vec![SqlValue::Integer(rowid)],
            },
            "",
        )
    } else {
        fetch_one(
            conn,
            table,
            &Predicate::null_safe(inserted)?,
            " ORDER BY rowid DESC LIMIT 1",
        )
    };
    match lookup {
        Ok(row) => Ok(row),
        Err(err) => {
            tracing::warn!(table, error = %err, "Could not reselect inserted row");
            Ok(None)
        }
    }
}

fn fetch_one(
    conn: &Connection,
    table: &str,
    predicate: &Predicate,
    suffix: &str,
) -> rusqlite::Result<Option<Map<String, Value>>> {
    let sql = format!(
        "SELECT * FROM {} WHERE {}{}",
        quote_identifier(table),
        predicate.clause,
        suffix
    );
    let mut stmt = conn.prepare(&sql)?;
    let names = value::column_names(&stmt);
    stmt.query_row(params_from_iter(predicate.params.iter()), |row| {
        value::row_to_object(row, &names)
    })
    .optional()
}

// ============================================================================
// Update and delete
// ============================================================================

/// Set one column of the row selected by `identifier`
///
/// Returns the number of rows changed. Primary key columns cannot be edited.
pub fn update_cell(
    reader: &mut SqliteReader,
    table: &str,
    identifier: &RowIdentifier,
    column: &str,
    new_value: &Value,
) -> Result<usize> {
    schema::ensure_table_exists(reader.connection(), table)?;
    let columns = schema::describe_table(reader.connection(), table)?;
    let target = schema::find_column(&columns, table, column)?;
    if target.primary_key {
        return Err(SqlviewError::InvalidInput(format!(
            "Column '{}' is part of the primary key and cannot be edited",
            target.name
        )));
    }
    let predicate = validated_predicate(&columns, table, identifier)?;

    let sql = format!(
        "UPDATE {} SET {} = ? WHERE {}",
        quote_identifier(table),
        quote_identifier(column),
        predicate.clause
    );
    let mut params = Vec::with_capacity(predicate.params.len() + 1);
    params.push(value::to_sql(new_value));
    params.extend(predicate.params.iter().cloned());

    reader.with_transaction(|tx| {
        ensure_row_exists(tx, table, &predicate, identifier)?;
        Ok(tx.execute(&sql, params_from_iter(params.iter()))?)
    })
}

/// Delete the row selected by `identifier`, returning the number removed
pub fn delete_row(
    reader: &mut SqliteReader,
    table: &str,
    identifier: &RowIdentifier,
) -> Result<usize> {
    schema::ensure_table_exists(reader.connection(), table)?;
    let columns = schema::describe_table(reader.connection(), table)?;
    let predicate = validated_predicate(&columns, table, identifier)?;

    let sql = format!(
        "DELETE FROM {} WHERE {}",
        quote_identifier(table),
        predicate.clause
    );

    reader.with_transaction(|tx| {
        ensure_row_exists(tx, table, &predicate, identifier)?;
        Ok(tx.execute(&sql, params_from_iter(predicate.params.iter()))?)
    })
}

fn validated_predicate(
    columns: &[ColumnDescriptor],
    table: &str,
    identifier: &RowIdentifier,
) -> Result<Predicate> {
    for part in identifier.parts() {
        schema::find_column(columns, table, &part.column)?;
    }
    identifier.predicate()
}

fn ensure_row_exists(
    conn: &Connection,
    table: &str,
    predicate: &Predicate,
    identifier: &RowIdentifier,
) -> Result<()> {
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE {}",
        quote_identifier(table),
        predicate.clause
    );
    let matches: i64 =
        conn.query_row(&sql, params_from_iter(predicate.params.iter()), |row| {
            row.get(0)
        })?;
    if matches == 0 {
        return Err(SqlviewError::RowNotFound(format!(
            "no row in '{}' where {}",
            table,
            identifier.describe()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::AccessMode;
    use serde_json::json;
    use std::path::PathBuf;

    fn database() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mutation.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE users (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT UNIQUE,
                role TEXT NOT NULL DEFAULT 'member',
                age INTEGER CHECK (age IS NULL OR age >= 0)
             );
             INSERT INTO users (name, email) VALUES ('Alice', 'alice@x.io'), ('Bob', 'bob@x.io');
             CREATE TABLE tags (slug TEXT PRIMARY KEY, label TEXT);
             CREATE TABLE posts (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id),
                title TEXT
             );
             CREATE TABLE log (message TEXT, level TEXT);
             INSERT INTO log VALUES ('boot', 'info');
             CREATE TABLE enrollments (
                student INTEGER,
                course TEXT,
                grade TEXT,
                PRIMARY KEY (student, course)
             );
             INSERT INTO enrollments VALUES (1, 'math', 'A'), (1, 'art', 'B'), (2, 'math', 'C');",
        )
        .unwrap();
        (dir, path)
    }

    fn open(path: &PathBuf) -> SqliteReader {
        SqliteReader::open(path, AccessMode::ReadWrite).unwrap()
    }

    fn row(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    fn count(reader: &SqliteReader, sql: &str) -> i64 {
        reader
            .connection()
            .query_row(sql, [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("users"), "\"users\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_row_identifier_deserialization() {
        let single: RowIdentifier = serde_json::from_value(json!({"column": "id", "value": 7})).unwrap();
        assert_eq!(
            single,
            RowIdentifier::Single(ColumnValue {
                column: "id".into(),
                value: json!(7)
            })
        );

        let composite: RowIdentifier = serde_json::from_value(json!({
            "compositeIdentifier": [
                {"column": "student", "value": 1},
                {"column": "course", "value": "math"}
            ]
        }))
        .unwrap();
        assert_eq!(composite.parts().len(), 2);
        assert_eq!(composite.describe(), "student = 1 AND course = \"math\"");
    }

    #[test]
    fn test_predicate_binds_values() {
        let identifier: RowIdentifier = serde_json::from_value(json!({
            "compositeIdentifier": [
                {"column": "a", "value": "x'; DROP TABLE users; --"},
                {"column": "b", "value": null}
            ]
        }))
        .unwrap();
        let predicate = identifier.predicate().unwrap();
        assert_eq!(predicate.clause, "\"a\" = ? AND \"b\" = ?");
        assert_eq!(
            predicate.params,
            vec![SqlValue::Text("x'; DROP TABLE users; --".into()), SqlValue::Null]
        );
    }

    #[test]
    fn test_empty_composite_identifier() {
        let identifier = RowIdentifier::Composite {
            composite_identifier: vec![],
        };
        assert!(matches!(
            identifier.predicate(),
            Err(SqlviewError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_insert_fills_defaults() {
        let (_dir, path) = database();
        let mut reader = open(&path);
        let outcome = insert_row(
            &mut reader,
            "users",
            &row(json!({"name": "Carol", "email": "carol@x.io"})),
        )
        .unwrap();
        assert_eq!(outcome.rowid, 3);
        let new_row = outcome.new_row.unwrap();
        assert_eq!(new_row["id"], 3);
        assert_eq!(new_row["name"], "Carol");
        assert_eq!(new_row["role"], "member");
        assert!(new_row["age"].is_null());
    }

    #[test]
    fn test_insert_missing_required_field() {
        let (_dir, path) = database();
        let mut reader = open(&path);
        let err = insert_row(&mut reader, "users", &row(json!({"email": "x@x.io"}))).unwrap_err();
        assert!(matches!(err, SqlviewError::MissingRequiredField(ref cols) if cols == &["name"]));
        assert_eq!(count(&reader, "SELECT COUNT(*) FROM users"), 2);
    }

    #[test]
    fn test_insert_null_required_field() {
        let (_dir, path) = database();
        let mut reader = open(&path);
        let err = insert_row(
            &mut reader,
            "users",
            &row(json!({"name": null, "email": "x@x.io"})),
        )
        .unwrap_err();
        assert!(matches!(err, SqlviewError::MissingRequiredField(ref cols) if cols == &["name"]));
        assert_eq!(count(&reader, "SELECT COUNT(*) FROM users"), 2);

        // Nullable columns still accept an explicit null.
        insert_row(
            &mut reader,
            "users",
            &row(json!({"name": "Dan", "email": null})),
        )
        .unwrap();
        assert_eq!(count(&reader, "SELECT COUNT(*) FROM users"), 3);
    }

    #[test]
    fn test_insert_unknown_column_and_table() {
        let (_dir, path) = database();
        let mut reader = open(&path);
        assert!(matches!(
            insert_row(&mut reader, "users", &row(json!({"name": "x", "shoe": 9}))),
            Err(SqlviewError::ColumnNotFound { .. })
        ));
        assert!(matches!(
            insert_row(&mut reader, "ghosts", &row(json!({"name": "x"}))),
            Err(SqlviewError::TableNotFound(_))
        ));
    }

    #[test]
    fn test_insert_constraint_mapping() {
        let (_dir, path) = database();
        let mut reader = open(&path);

        let err = insert_row(
            &mut reader,
            "users",
            &row(json!({"name": "Dup", "email": "alice@x.io"})),
        )
        .unwrap_err();
        assert!(matches!(err, SqlviewError::Conflict(_)));

        let err = insert_row(&mut reader, "users", &row(json!({"name": "Neg", "age": -1}))).unwrap_err();
        assert!(matches!(err, SqlviewError::UnprocessableEntity(_)));

        let err = insert_row(&mut reader, "posts", &row(json!({"user_id": 99, "title": "t"}))).unwrap_err();
        assert!(matches!(err, SqlviewError::UnprocessableEntity(_)));

        assert_eq!(count(&reader, "SELECT COUNT(*) FROM users"), 2);
        assert_eq!(count(&reader, "SELECT COUNT(*) FROM posts"), 0);
    }

    #[test]
    fn test_insert_text_primary_key() {
        let (_dir, path) = database();
        let mut reader = open(&path);
        let outcome = insert_row(
            &mut reader,
            "tags",
            &row(json!({"slug": "rust", "label": "Rust"})),
        )
        .unwrap();
        assert_eq!(outcome.new_row.unwrap(), row(json!({"slug": "rust", "label": "Rust"})));
    }

    #[test]
    fn test_insert_without_primary_key_uses_latest_match() {
        let (_dir, path) = database();
        let mut reader = open(&path);
        let outcome = insert_row(
            &mut reader,
            "log",
            &row(json!({"message": "ready", "level": null})),
        )
        .unwrap();
        assert_eq!(outcome.new_row.unwrap(), row(json!({"message": "ready", "level": null})));

        let outcome = insert_row(&mut reader, "log", &Map::new()).unwrap();
        assert_eq!(outcome.new_row.unwrap(), row(json!({"message": null, "level": null})));
    }

    #[test]
    fn test_update_cell() {
        let (_dir, path) = database();
        let mut reader = open(&path);
        let identifier = RowIdentifier::Single(ColumnValue {
            column: "id".into(),
            value: json!(2),
        });
        let changed = update_cell(&mut reader, "users", &identifier, "name", &json!("Robert")).unwrap();
        assert_eq!(changed, 1);
        let name: String = reader
            .connection()
            .query_row("SELECT name FROM users WHERE id = 2", [], |row| row.get(0))
            .unwrap();
        assert_eq!(name, "Robert");
    }

    #[test]
    fn test_update_row_not_found_changes_nothing() {
        let (_dir, path) = database();
        let mut reader = open(&path);
        let identifier = RowIdentifier::Single(ColumnValue {
            column: "id".into(),
            value: json!(999),
        });
        let err = update_cell(&mut reader, "users", &identifier, "name", &json!("Ghost")).unwrap_err();
        assert!(matches!(err, SqlviewError::RowNotFound(_)));
        assert!(err.to_string().contains("not found"));
        assert_eq!(count(&reader, "SELECT COUNT(*) FROM users WHERE name = 'Ghost'"), 0);
    }

    #[test]
    fn test_update_validates_columns() {
        let (_dir, path) = database();
        let mut reader = open(&path);
        let by_id = RowIdentifier::Single(ColumnValue {
            column: "id".into(),
            value: json!(1),
        });
        assert!(matches!(
            update_cell(&mut reader, "users", &by_id, "nickname", &json!("x")),
            Err(SqlviewError::ColumnNotFound { .. })
        ));
        assert!(matches!(
            update_cell(&mut reader, "users", &by_id, "id", &json!(5)),
            Err(SqlviewError::InvalidInput(_))
        ));
        let by_unknown = RowIdentifier::Single(ColumnValue {
            column: "uuid".into(),
            value: json!("x"),
        });
        assert!(matches!(
            update_cell(&mut reader, "users", &by_unknown, "name", &json!("x")),
            Err(SqlviewError::ColumnNotFound { .. })
        ));
    }

    #[test]
    fn test_update_unique_conflict_rolls_back() {
        let (_dir, path) = database();
        let mut reader = open(&path);
        let identifier = RowIdentifier::Single(ColumnValue {
            column: "id".into(),
            value: json!(2),
        });
        let err = update_cell(&mut reader, "users", &identifier, "email", &json!("alice@x.io")).unwrap_err();
        assert!(matches!(err, SqlviewError::Conflict(_)));
        assert_eq!(count(&reader, "SELECT COUNT(*) FROM users WHERE email = 'bob@x.io'"), 1);
    }

    #[test]
    fn test_update_with_composite_identifier() {
        let (_dir, path) = database();
        let mut reader = open(&path);
        let identifier: RowIdentifier = serde_json::from_value(json!({
            "compositeIdentifier": [
                {"column": "student", "value": 1},
                {"column": "course", "value": "math"}
            ]
        }))
        .unwrap();
        assert_eq!(
            update_cell(&mut reader, "enrollments", &identifier, "grade", &json!("A+")).unwrap(),
            1
        );
        assert_eq!(count(&reader, "SELECT COUNT(*) FROM enrollments WHERE grade = 'A+'"), 1);
    }

    #[test]
    fn test_delete_row() {
        let (_dir, path) = database();
        let mut reader = open(&path);
        let identifier: RowIdentifier = serde_json::from_value(json!({
            "compositeIdentifier": [
                {"column": "student", "value": 1},
                {"column": "course", "value": "art"}
            ]
        }))
        .unwrap();
        assert_eq!(delete_row(&mut reader, "enrollments", &identifier).unwrap(), 1);
        assert_eq!(count(&reader, "SELECT COUNT(*) FROM enrollments"), 2);
    }

    #[test]
    fn test_delete_row_not_found() {
        let (_dir, path) = database();
        let mut reader = open(&path);
        let identifier = RowIdentifier::Single(ColumnValue {
            column: "id".into(),
            value: json!(999),
        });
        let err = delete_row(&mut reader, "users", &identifier).unwrap_err();
        assert!(matches!(err, SqlviewError::RowNotFound(_)));
        assert_eq!(count(&reader, "SELECT COUNT(*) FROM users"), 2);
    }

    #[test]
    fn test_delete_restricted_by_foreign_key() {
        let (_dir, path) = database();
        let mut reader = open(&path);
        reader
            .connection()
            .execute("INSERT INTO posts (user_id, title) VALUES (1, 'hello')", [])
            .unwrap();
        let identifier = RowIdentifier::Single(ColumnValue {
            column: "id".into(),
            value: json!(1),
        });
        let err = delete_row(&mut reader, "users", &identifier).unwrap_err();
        assert!(matches!(err, SqlviewError::UnprocessableEntity(_)));
        assert_eq!(count(&reader, "SELECT COUNT(*) FROM users"), 2);
    }
}
