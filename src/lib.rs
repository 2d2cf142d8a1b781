/*!
# sqlview

Backend library for a browser-based SQLite viewer and editor.

Each user uploads (or creates) a database file that is kept in a shared
session directory. The library resolves a session to its file, executes
single SQL statements against it, and performs validated single-row
mutations.

## Modules

- [`session`] - session ids and the [`session::SessionStore`] that maps them to files
- [`reader`] - opening database handles, value conversion, transactions, paging
- [`schema`] - table listing and column introspection
- [`gateway`] - classification and execution of user-submitted SQL
- [`mutation`] - row identifiers and insert/update/delete helpers
*/

pub mod gateway;
pub mod mutation;
pub mod reader;
pub mod schema;
pub mod session;

pub use gateway::{QueryType, SqlOutcome};
pub use mutation::RowIdentifier;
pub use reader::{AccessMode, SqliteReader};
pub use schema::ColumnDescriptor;
pub use session::{FsSessionStore, SessionFile, SessionStore};

/// Crate version, reported by the health and version endpoints
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Errors produced by session resolution, SQL execution and row mutation
#[derive(Debug, thiserror::Error)]
pub enum SqlviewError {
    #[error("No session ID provided")]
    MissingSession,

    #[error("Database not found for session '{0}'")]
    SessionNotFound(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Column '{column}' not found in table '{table}'")]
    ColumnNotFound { table: String, column: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unsupported query type: {0}. Only SELECT, UPDATE, DELETE, INSERT and CREATE statements are allowed")]
    UnsupportedQueryType(String),

    #[error("Multiple SQL statements are not allowed")]
    MultiStatementRejected,

    #[error("Database unavailable: {0}")]
    DatabaseUnavailable(String),

    #[error("Row not found: {0}")]
    RowNotFound(String),

    #[error("Missing required field(s): {}", .0.join(", "))]
    MissingRequiredField(Vec<String>),

    #[error("Constraint violation: {0}")]
    Conflict(String),

    #[error("Constraint violation: {0}")]
    UnprocessableEntity(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<rusqlite::Error> for SqlviewError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ffi;

        match &err {
            rusqlite::Error::SqliteFailure(failure, _)
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                match failure.extended_code {
                    ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                        SqlviewError::Conflict(err.to_string())
                    }
                    ffi::SQLITE_CONSTRAINT_FOREIGNKEY | ffi::SQLITE_CONSTRAINT_CHECK => {
                        SqlviewError::UnprocessableEntity(err.to_string())
                    }
                    _ => SqlviewError::InternalError(err.to_string()),
                }
            }
            rusqlite::Error::SqliteFailure(failure, _)
                if matches!(
                    failure.code,
                    rusqlite::ErrorCode::NotADatabase | rusqlite::ErrorCode::CannotOpen
                ) =>
            {
                SqlviewError::DatabaseUnavailable(err.to_string())
            }
            _ => SqlviewError::InternalError(err.to_string()),
        }
    }
}

impl From<std::io::Error> for SqlviewError {
    fn from(err: std::io::Error) -> Self {
        SqlviewError::InternalError(format!("I/O error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, SqlviewError>;
