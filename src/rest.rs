/*!
sqlview REST API Server

Serves the backend of the browser SQLite viewer: upload or create a database,
browse its tables, run single SQL statements and edit individual rows.

## Usage

```bash
sqlview-rest --host 127.0.0.1 --port 3334 --data-dir /var/lib/sqlview
```

## Endpoints

- `POST /api/create-db` - Create an empty database for the session
- `POST /api/upload` - Upload a SQLite file (multipart field `file`)
- `GET  /api/tables` - List tables
- `GET  /api/data/:tableName` - Page through a table's rows
- `POST /api/sql` - Execute a single SQL statement
- `POST /api/insert` - Insert one row
- `POST /api/edit` - Update one cell
- `POST /api/delete` - Delete one row
- `GET  /api/export` - Download the session database
- `GET  /api/health` - Health check
- `GET  /api/version` - Version information

Every endpoint except create-db and upload needs a session id, passed as the
`sessionId` query parameter or the `sessionId` cookie.
*/

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use anyhow::Context;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use clap::Parser;
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sqlview::gateway::{SqlGateway, MAX_SELECT_ROWS};
use sqlview::mutation;
use sqlview::session::{self, SESSION_PARAM};
use sqlview::{
    schema, AccessMode, ColumnDescriptor, FsSessionStore, QueryType, RowIdentifier, SessionStore,
    SqlOutcome, SqliteReader, SqlviewError, VERSION,
};

/// Extensions accepted by the upload endpoint
const UPLOAD_EXTENSIONS: &[&str] = &["sqlite", "sqlite3", "db", "db3"];

/// First bytes of every SQLite 3 database file
const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";

const DEFAULT_PAGE_SIZE: usize = 100;
const MAX_PAGE_SIZE: usize = 1000;

/// CLI arguments for the REST API server
#[derive(Parser)]
#[command(name = "sqlview-rest")]
#[command(about = "sqlview REST API Server")]
#[command(version = VERSION)]
struct Cli {
    /// Host address to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind to
    #[arg(long, default_value = "3334")]
    port: u16,

    /// CORS allowed origins (comma-separated)
    #[arg(long, default_value = "*")]
    cors_origin: String,

    /// Directory holding the session database files
    /// (default: <system temp>/sqlview-sessions)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Largest accepted upload, in megabytes
    #[arg(long, default_value = "100")]
    max_upload_mb: usize,

    /// Maximum rows returned by /api/sql for a SELECT
    #[arg(long, default_value_t = MAX_SELECT_ROWS)]
    sql_max_rows: usize,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    /// Maps session ids to database files
    sessions: Arc<dyn SessionStore>,
    gateway: SqlGateway,
    max_upload_bytes: usize,
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for /api/sql
///
/// `sql` is kept as a raw value so a non-string can be reported as invalid
/// input rather than a decoding failure.
#[derive(Debug, Deserialize)]
struct SqlRequest {
    #[serde(default)]
    sql: Value,
}

/// Request body for /api/insert
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertRequest {
    table_name: Option<String>,
    row_data: Option<Map<String, Value>>,
}

/// Request body for /api/edit
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditRequest {
    table_name: Option<String>,
    row_identifier: Option<RowIdentifier>,
    column_name: Option<String>,
    /// `Some(Value::Null)` when the client sends `null`, `None` when absent
    #[serde(default, deserialize_with = "present")]
    new_value: Option<Value>,
}

/// Request body for /api/delete
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteRequest {
    table_name: Option<String>,
    row_identifier: Option<RowIdentifier>,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Serialize)]
struct TableEntry {
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateDbResponse {
    success: bool,
    session_id: String,
    tables: Vec<TableEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    success: bool,
    session_id: String,
    /// Name of the file as uploaded
    filename: String,
    /// Name of the file in the session directory
    filepath: String,
}

#[derive(Debug, Serialize)]
struct TablesResponse {
    tables: Vec<TableEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DataResponse {
    table_name: String,
    columns: Vec<ColumnDescriptor>,
    data: Vec<Map<String, Value>>,
    pagination: Pagination,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    page: usize,
    limit: usize,
    total_rows: usize,
    total_pages: usize,
}

/// /api/sql response; the shape depends on the statement type
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum SqlResponse {
    Select(SelectResponse),
    Mutation(MutationResponse),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SelectResponse {
    success: bool,
    query_type: QueryType,
    results: Vec<Map<String, Value>>,
    total_rows: usize,
    has_more_rows: bool,
    columns: Vec<String>,
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MutationResponse {
    success: bool,
    query_type: QueryType,
    affected_rows: usize,
    last_insert_rowid: Option<i64>,
    message: String,
}

impl From<SqlOutcome> for SqlResponse {
    fn from(outcome: SqlOutcome) -> Self {
        let message = outcome.message();
        match outcome {
            SqlOutcome::Select(select) => SqlResponse::Select(SelectResponse {
                success: true,
                query_type: QueryType::Select,
                results: select.rows,
                total_rows: select.total_rows,
                has_more_rows: select.has_more_rows,
                columns: select.columns,
                message,
            }),
            SqlOutcome::Mutation(mutation) => SqlResponse::Mutation(MutationResponse {
                success: true,
                query_type: mutation.query_type,
                affected_rows: mutation.affected_rows,
                last_insert_rowid: mutation.last_insert_rowid,
                message,
            }),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertResponse {
    success: bool,
    message: String,
    new_row: Option<Map<String, Value>>,
}

/// Response of /api/edit and /api/delete
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RowChangeResponse {
    success: bool,
    message: String,
    affected_rows: usize,
}

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Version response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VersionResponse {
    version: String,
    max_select_rows: usize,
}

// ============================================================================
// Error Handling
// ============================================================================

/// Error API response
#[derive(Debug, Serialize)]
struct ApiError {
    error: String,
}

/// Custom error type for API responses
struct ApiErrorResponse {
    status: StatusCode,
    error: ApiError,
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        let json = Json(self.error);
        (self.status, json).into_response()
    }
}

impl From<SqlviewError> for ApiErrorResponse {
    fn from(err: SqlviewError) -> Self {
        let status = match &err {
            SqlviewError::MissingSession
            | SqlviewError::ColumnNotFound { .. }
            | SqlviewError::InvalidInput(_)
            | SqlviewError::UnsupportedQueryType(_)
            | SqlviewError::MultiStatementRejected
            | SqlviewError::MissingRequiredField(_) => StatusCode::BAD_REQUEST,
            SqlviewError::SessionNotFound(_) | SqlviewError::TableNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            SqlviewError::Conflict(_) => StatusCode::CONFLICT,
            SqlviewError::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SqlviewError::DatabaseUnavailable(_)
            | SqlviewError::RowNotFound(_)
            | SqlviewError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %err, "Request failed");
        } else {
            tracing::debug!(error = %err, %status, "Request rejected");
        }

        ApiErrorResponse {
            status,
            error: ApiError {
                error: err.to_string(),
            },
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn decode<T: DeserializeOwned>(body: &Bytes) -> Result<T, SqlviewError> {
    serde_json::from_slice(body)
        .map_err(|e| SqlviewError::InvalidInput(format!("invalid request json: {}", e)))
}

/// Unwrap a request field, rejecting absent values and empty strings
fn required<T>(value: Option<T>, field: &str) -> Result<T, SqlviewError>
where
    T: AsRef<str>,
{
    match value {
        Some(value) if !value.as_ref().trim().is_empty() => Ok(value),
        _ => Err(SqlviewError::InvalidInput(format!("{} is required", field))),
    }
}

fn require<T>(value: Option<T>, field: &str) -> Result<T, SqlviewError> {
    value.ok_or_else(|| SqlviewError::InvalidInput(format!("{} is required", field)))
}

/// Session id from the `sessionId` query parameter, falling back to the cookie
fn request_session_id(
    params: &HashMap<String, String>,
    jar: &CookieJar,
) -> Result<String, SqlviewError> {
    session::select_session_id(
        params.get(SESSION_PARAM).map(String::as_str),
        jar.get(SESSION_PARAM).map(Cookie::value),
    )
}

/// Run database work on the blocking pool
async fn run_blocking<T, F>(work: F) -> Result<T, ApiErrorResponse>
where
    F: FnOnce() -> sqlview::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result.map_err(ApiErrorResponse::from),
        Err(err) => Err(SqlviewError::InternalError(format!(
            "database worker join error: {}",
            err
        ))
        .into()),
    }
}

/// Resolve the session, open its database and run `work` against it
async fn with_session_db<T, F>(
    state: &AppState,
    session_id: String,
    mode: AccessMode,
    work: F,
) -> Result<T, ApiErrorResponse>
where
    F: FnOnce(&mut SqliteReader) -> sqlview::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let sessions = state.sessions.clone();
    run_blocking(move || {
        let file = sessions.resolve(&session_id)?;
        let mut reader = SqliteReader::open(&file.path, mode)?;
        work(&mut reader)
    })
    .await
}

fn table_entries(names: Vec<String>) -> Vec<TableEntry> {
    names.into_iter().map(|name| TableEntry { name }).collect()
}

/// Cookie that pins the session id in the browser
fn session_cookie(session_id: &str) -> Cookie<'static> {
    Cookie::build((SESSION_PARAM, session_id.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

/// Parse an optional positive integer query parameter
fn positive_param(
    params: &HashMap<String, String>,
    name: &str,
    default: usize,
) -> Result<usize, SqlviewError> {
    match params.get(name) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<usize>() {
            Ok(value) if value >= 1 => Ok(value),
            _ => Err(SqlviewError::InvalidInput(format!(
                "{} must be a positive integer",
                name
            ))),
        },
    }
}

fn validate_upload(filename: &str, data: &[u8], max_bytes: usize) -> Result<(), SqlviewError> {
    let extension = std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    if !UPLOAD_EXTENSIONS.contains(&extension.as_str()) {
        return Err(SqlviewError::InvalidInput(format!(
            "Invalid file type: {} (supported: .sqlite, .sqlite3, .db, .db3)",
            filename
        )));
    }
    if data.len() > max_bytes {
        return Err(SqlviewError::InvalidInput(format!(
            "File too large: {} bytes (limit {} bytes)",
            data.len(),
            max_bytes
        )));
    }
    if !data.starts_with(SQLITE_MAGIC) {
        return Err(SqlviewError::InvalidInput(format!(
            "{} is not a SQLite database",
            filename
        )));
    }
    Ok(())
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> ApiErrorResponse {
    SqlviewError::InvalidInput(format!("invalid multipart body: {}", err)).into()
}

// ============================================================================
// Handler Functions
// ============================================================================

/// POST /api/create-db - Create an empty database for the session
async fn create_db_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    jar: CookieJar,
) -> Result<Response, ApiErrorResponse> {
    let existing = request_session_id(&params, &jar).ok();
    let sessions = state.sessions.clone();

    let (session_id, tables) = run_blocking(move || {
        let session_id = existing.unwrap_or_else(|| sessions.create());
        let path = sessions.allocate(&session_id, None)?;
        let reader = SqliteReader::create(&path)?;
        let tables = schema::list_tables(reader.connection())?;
        Ok((session_id, tables))
    })
    .await?;

    info!(session_id = %session_id, "Created empty database");
    let body = Json(CreateDbResponse {
        success: true,
        session_id: session_id.clone(),
        tables: table_entries(tables),
    });
    Ok((jar.add(session_cookie(&session_id)), body).into_response())
}

/// POST /api/upload - Store an uploaded SQLite file for the session
async fn upload_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    jar: CookieJar,
    mut multipart: Multipart,
) -> Result<Response, ApiErrorResponse> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| SqlviewError::InvalidInput("uploaded file has no name".to_string()))?;
        let data = field.bytes().await.map_err(multipart_error)?;
        upload = Some((filename, data));
        break;
    }
    let (filename, data) =
        upload.ok_or_else(|| SqlviewError::InvalidInput("No file uploaded".to_string()))?;
    validate_upload(&filename, &data, state.max_upload_bytes)?;

    info!("Uploading {} ({} bytes)", filename, data.len());
    let existing = request_session_id(&params, &jar).ok();
    let sessions = state.sessions.clone();
    let original_name = filename.clone();

    let (session_id, stored_name) = run_blocking(move || {
        let session_id = existing.unwrap_or_else(|| sessions.create());
        // The session keeps its current database until the upload checks out.
        let staged = sessions.stage(&session_id)?;
        std::fs::write(&staged, &data)?;
        if let Err(err) = SqliteReader::open(&staged, AccessMode::ReadOnly) {
            let _ = std::fs::remove_file(&staged);
            return Err(SqlviewError::InvalidInput(format!(
                "{} is not a valid SQLite database: {}",
                original_name, err
            )));
        }
        let path = match sessions.install(&session_id, Some(&original_name), &staged) {
            Ok(path) => path,
            Err(err) => {
                let _ = std::fs::remove_file(&staged);
                return Err(err);
            }
        };
        let stored_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| session_id.clone());
        Ok((session_id, stored_name))
    })
    .await?;

    info!(session_id = %session_id, "Stored upload as {}", stored_name);
    let body = Json(UploadResponse {
        success: true,
        session_id: session_id.clone(),
        filename,
        filepath: stored_name,
    });
    Ok((jar.add(session_cookie(&session_id)), body).into_response())
}

/// GET /api/tables - List the tables of the session database
async fn tables_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    jar: CookieJar,
) -> Result<Json<TablesResponse>, ApiErrorResponse> {
    let session_id = request_session_id(&params, &jar)?;
    let tables = with_session_db(&state, session_id, AccessMode::ReadOnly, |reader| {
        schema::list_tables(reader.connection())
    })
    .await?;

    Ok(Json(TablesResponse {
        tables: table_entries(tables),
    }))
}

/// GET /api/data/:tableName - One page of a table's rows
async fn data_handler(
    State(state): State<AppState>,
    Path(table_name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    jar: CookieJar,
) -> Result<Json<DataResponse>, ApiErrorResponse> {
    let page = positive_param(&params, "page", 1)?;
    let limit = positive_param(&params, "limit", DEFAULT_PAGE_SIZE)?;
    if limit > MAX_PAGE_SIZE {
        return Err(SqlviewError::InvalidInput(format!(
            "limit must not exceed {}",
            MAX_PAGE_SIZE
        ))
        .into());
    }
    let session_id = request_session_id(&params, &jar)?;

    let table = table_name.clone();
    let result = with_session_db(&state, session_id, AccessMode::ReadOnly, move |reader| {
        reader.fetch_page(&table, page, limit)
    })
    .await?;

    Ok(Json(DataResponse {
        table_name,
        columns: result.columns,
        data: result.rows,
        pagination: Pagination {
            page,
            limit,
            total_rows: result.total_rows,
            total_pages: result.total_rows.div_ceil(limit),
        },
    }))
}

/// POST /api/sql - Execute a single SQL statement
async fn sql_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    jar: CookieJar,
    body: Bytes,
) -> Result<Json<SqlResponse>, ApiErrorResponse> {
    let request: SqlRequest = decode(&body)?;
    let sql = match request.sql {
        Value::String(sql) if !sql.trim().is_empty() => sql,
        _ => {
            return Err(
                SqlviewError::InvalidInput("sql must be a non-empty string".to_string()).into(),
            )
        }
    };
    let session_id = request_session_id(&params, &jar)?;
    info!("Executing SQL: {} chars", sql.len());

    let sessions = state.sessions.clone();
    let gateway = state.gateway;
    let outcome = run_blocking(move || {
        let file = sessions.resolve(&session_id)?;
        gateway.execute(&file.path, &sql)
    })
    .await?;

    info!(query_type = %outcome.query_type(), "{}", outcome.message());
    Ok(Json(outcome.into()))
}

/// POST /api/insert - Insert one row
async fn insert_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    jar: CookieJar,
    body: Bytes,
) -> Result<Json<InsertResponse>, ApiErrorResponse> {
    let request: InsertRequest = decode(&body)?;
    let table_name = required(request.table_name, "tableName")?;
    let row_data = require(request.row_data, "rowData")?;
    let session_id = request_session_id(&params, &jar)?;

    let outcome = with_session_db(&state, session_id, AccessMode::ReadWrite, move |reader| {
        mutation::insert_row(reader, &table_name, &row_data)
    })
    .await?;

    info!(rowid = outcome.rowid, "Inserted row");
    Ok(Json(InsertResponse {
        success: true,
        message: "Row inserted successfully".to_string(),
        new_row: outcome.new_row,
    }))
}

/// POST /api/edit - Update one cell of one row
async fn edit_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    jar: CookieJar,
    body: Bytes,
) -> Result<Json<RowChangeResponse>, ApiErrorResponse> {
    let request: EditRequest = decode(&body)?;
    let table_name = required(request.table_name, "tableName")?;
    let identifier = require(request.row_identifier, "rowIdentifier")?;
    let column_name = required(request.column_name, "columnName")?;
    let new_value = require(request.new_value, "newValue")?;
    let session_id = request_session_id(&params, &jar)?;

    let affected_rows = with_session_db(&state, session_id, AccessMode::ReadWrite, move |reader| {
        mutation::update_cell(reader, &table_name, &identifier, &column_name, &new_value)
    })
    .await?;

    Ok(Json(RowChangeResponse {
        success: true,
        message: "Row updated successfully".to_string(),
        affected_rows,
    }))
}

/// POST /api/delete - Delete one row
async fn delete_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    jar: CookieJar,
    body: Bytes,
) -> Result<Json<RowChangeResponse>, ApiErrorResponse> {
    let request: DeleteRequest = decode(&body)?;
    let table_name = required(request.table_name, "tableName")?;
    let identifier = require(request.row_identifier, "rowIdentifier")?;
    let session_id = request_session_id(&params, &jar)?;

    let affected_rows = with_session_db(&state, session_id, AccessMode::ReadWrite, move |reader| {
        mutation::delete_row(reader, &table_name, &identifier)
    })
    .await?;

    Ok(Json(RowChangeResponse {
        success: true,
        message: "Row deleted successfully".to_string(),
        affected_rows,
    }))
}

/// GET /api/export - Download the session database
async fn export_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    jar: CookieJar,
) -> Result<Response, ApiErrorResponse> {
    let session_id = request_session_id(&params, &jar)?;
    let sessions = state.sessions.clone();
    let (file, contents) = run_blocking(move || {
        let file = sessions.resolve(&session_id)?;
        let contents = std::fs::read(&file.path)?;
        Ok((file, contents))
    })
    .await?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        file.export_name().replace('"', "_")
    );
    info!(session_id = %file.session_id, "Exporting {} bytes", contents.len());
    Ok((
        [
            (header::CONTENT_TYPE, "application/vnd.sqlite3".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        contents,
    )
        .into_response())
}

/// GET /api/health - Health check
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: VERSION.to_string(),
    })
}

/// GET /api/version - Version information
async fn version_handler(State(state): State<AppState>) -> Json<VersionResponse> {
    Json(VersionResponse {
        version: VERSION.to_string(),
        max_select_rows: state.gateway.max_rows(),
    })
}

/// Root handler
async fn root_handler() -> &'static str {
    "sqlview REST API Server - See /api/health for status"
}

// ============================================================================
// Main Server
// ============================================================================

fn build_router(state: AppState) -> Router {
    // Multipart framing adds a little on top of the file itself.
    let upload_limit = state.max_upload_bytes.saturating_add(64 * 1024);

    Router::new()
        .route("/", get(root_handler))
        .route("/api/health", get(health_handler))
        .route("/api/version", get(version_handler))
        .route("/api/create-db", post(create_db_handler))
        .route(
            "/api/upload",
            post(upload_handler).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/tables", get(tables_handler))
        .route("/api/data/:tableName", get(data_handler))
        .route("/api/sql", post(sql_handler))
        .route("/api/insert", post(insert_handler))
        .route("/api/edit", post(edit_handler))
        .route("/api/delete", post(delete_handler))
        .route("/api/export", get(export_handler))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sqlview_rest=info,sqlview=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    let data_dir = cli.data_dir.unwrap_or_else(FsSessionStore::default_root);
    let sessions = FsSessionStore::open(&data_dir)
        .with_context(|| format!("Failed to open session directory {}", data_dir.display()))?;
    info!("Storing session databases in {}", data_dir.display());

    // Create application state
    let state = AppState {
        sessions: Arc::new(sessions),
        gateway: SqlGateway::new(cli.sql_max_rows),
        max_upload_bytes: cli.max_upload_mb.saturating_mul(1024 * 1024),
    };

    // Configure CORS
    let cors = if cli.cors_origin == "*" {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(vec![header::CONTENT_TYPE])
    } else {
        let origins: Vec<_> = cli
            .cors_origin
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(vec![header::CONTENT_TYPE])
    };

    let app = build_router(state)
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    // Parse bind address
    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
        .parse()
        .with_context(|| format!("Invalid host or port: {}:{}", cli.host, cli.port))?;

    info!("Starting sqlview REST API server on {}", addr);
    info!("API documentation:");
    info!("  POST /api/create-db        - Create an empty database");
    info!("  POST /api/upload           - Upload a SQLite file");
    info!("  GET  /api/tables           - List tables");
    info!("  GET  /api/data/:tableName  - Page through table rows");
    info!("  POST /api/sql              - Execute one SQL statement");
    info!("  POST /api/insert|edit|delete - Row mutations");
    info!("  GET  /api/export           - Download the database");
    info!("  GET  /api/health           - Health check");

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
