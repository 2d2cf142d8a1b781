//! Conversion between SQLite values and JSON

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Row, Statement};
use serde_json::{Map, Number, Value};

/// Convert a SQLite value to JSON
///
/// BLOBs have no JSON counterpart and are returned as an array of bytes.
pub fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
    }
}

/// Convert a JSON value to a bindable SQLite value
///
/// Booleans become 0/1; arrays and objects are stored as their JSON text.
pub fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Result column names of a prepared statement, in order
pub fn column_names(stmt: &Statement<'_>) -> Vec<String> {
    stmt.column_names()
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Read a row into a JSON object keyed by column name
///
/// Duplicate column names keep the value of the last occurrence.
pub fn row_to_object(row: &Row<'_>, columns: &[String]) -> rusqlite::Result<Map<String, Value>> {
    let mut object = Map::with_capacity(columns.len());
    for (idx, name) in columns.iter().enumerate() {
        object.insert(name.clone(), to_json(row.get_ref(idx)?));
    }
    Ok(object)
}
