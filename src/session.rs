//! Session management for sqlview
//!
//! A session is an opaque UUID that owns exactly one database file. The
//! session id travels with each request, either as the `sessionId` query
//! parameter or as a cookie of the same name; the query parameter wins.
//!
//! Files are stored as `<sessionId>` or `<sessionId>.<original filename>`
//! inside a single directory. Lookup matches the text before the first `.`
//! exactly, so two sessions sharing a common prefix never collide.

use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::{Result, SqlviewError};

/// Name of both the query parameter and the cookie carrying the session id
pub const SESSION_PARAM: &str = "sessionId";

/// Download name used when a session has no original filename
const DEFAULT_DATABASE_NAME: &str = "database.sqlite";

/// A resolved session database file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFile {
    /// Session identifier
    pub session_id: String,
    /// Location of the database file
    pub path: PathBuf,
    /// Filename the user uploaded, if any
    pub original_name: Option<String>,
}

impl SessionFile {
    /// Name of the file as stored in the session directory
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.session_id.clone())
    }

    /// Attachment name offered when the database is exported
    ///
    /// `shop.db` becomes `shop_edited.db`; a name without an extension just
    /// gets the `_edited` suffix.
    pub fn export_name(&self) -> String {
        let original = self
            .original_name
            .as_deref()
            .unwrap_or(DEFAULT_DATABASE_NAME);
        match original.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => format!("{}_edited.{}", stem, ext),
            _ => format!("{}_edited", original),
        }
    }
}

/// Storage backend mapping session ids to database files
pub trait SessionStore: Send + Sync {
    /// Generate a fresh session id
    fn create(&self) -> String;

    /// Locate the database file owned by a session
    ///
    /// # Errors
    ///
    /// Returns `SqlviewError::SessionNotFound` when no file belongs to the session.
    fn resolve(&self, session_id: &str) -> Result<SessionFile>;

    /// Reserve the path a session's new database file should be written to
    ///
    /// Any file the session owned before is removed, keeping the
    /// one-file-per-session invariant.
    fn allocate(&self, session_id: &str, original_name: Option<&str>) -> Result<PathBuf>;

    /// A scratch path, invisible to [`resolve`](SessionStore::resolve), for
    /// writing a replacement database before it is validated
    fn stage(&self, session_id: &str) -> Result<PathBuf>;

    /// Make a staged file the session's database, replacing any previous one
    ///
    /// The session keeps its old file until the staged one is moved in.
    fn install(
        &self,
        session_id: &str,
        original_name: Option<&str>,
        staged: &Path,
    ) -> Result<PathBuf>;
}

/// Session store backed by a directory on the local filesystem
#[derive(Debug, Clone)]
pub struct FsSessionStore {
    root: PathBuf,
}

impl FsSessionStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Default session directory inside the system temp dir
    pub fn default_root() -> PathBuf {
        std::env::temp_dir().join("sqlview-sessions")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_files(&self, session_id: &str) -> Result<Vec<PathBuf>> {
        let mut matches = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if is_sidecar_file(&name) {
                continue;
            }
            if split_file_name(&name).0 == session_id {
                matches.push(entry.path());
            }
        }
        matches.sort();
        Ok(matches)
    }

    /// Where a session's database with this original name is stored
    fn target_path(&self, session_id: &str, original_name: Option<&str>) -> Result<PathBuf> {
        ensure_valid_session_id(session_id)?;
        let file_name = match original_name.map(sanitize_file_name) {
            Some(name) if !name.is_empty() => format!("{}.{}", session_id, name),
            _ => session_id.to_string(),
        };
        Ok(self.root.join(file_name))
    }
}

impl SessionStore for FsSessionStore {
    fn create(&self) -> String {
        Uuid::new_v4().to_string()
    }

    fn resolve(&self, session_id: &str) -> Result<SessionFile> {
        if !is_valid_session_id(session_id) {
            return Err(not_found(session_id));
        }

        let files = self.session_files(session_id)?;
        if files.len() > 1 {
            tracing::warn!(
                session_id,
                count = files.len(),
                "Multiple files found for session, using the first"
            );
        }
        let path = files
            .into_iter()
            .next()
            .ok_or_else(|| not_found(session_id))?;

        let original_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .and_then(|name| split_file_name(&name).1.map(str::to_string));

        Ok(SessionFile {
            session_id: session_id.to_string(),
            path,
            original_name,
        })
    }

    fn allocate(&self, session_id: &str, original_name: Option<&str>) -> Result<PathBuf> {
        let target = self.target_path(session_id, original_name)?;
        for existing in self.session_files(session_id)? {
            fs::remove_file(&existing)?;
        }
        Ok(target)
    }

    fn stage(&self, session_id: &str) -> Result<PathBuf> {
        ensure_valid_session_id(session_id)?;
        // The leading '.' gives an empty stem, which never matches a session.
        Ok(self
            .root
            .join(format!(".upload-{}-{}", session_id, Uuid::new_v4())))
    }

    fn install(
        &self,
        session_id: &str,
        original_name: Option<&str>,
        staged: &Path,
    ) -> Result<PathBuf> {
        let target = self.target_path(session_id, original_name)?;
        for existing in self.session_files(session_id)? {
            if existing != target {
                fs::remove_file(&existing)?;
            }
        }
        fs::rename(staged, &target)?;
        Ok(target)
    }
}

fn ensure_valid_session_id(session_id: &str) -> Result<()> {
    if is_valid_session_id(session_id) {
        Ok(())
    } else {
        Err(SqlviewError::InvalidInput(format!(
            "Invalid session ID '{}'",
            session_id
        )))
    }
}

fn not_found(session_id: &str) -> SqlviewError {
    SqlviewError::SessionNotFound(session_id.to_string())
}

/// Split a stored file name into its session id and original filename
fn split_file_name(name: &str) -> (&str, Option<&str>) {
    match name.split_once('.') {
        Some((stem, rest)) if !rest.is_empty() => (stem, Some(rest)),
        Some((stem, _)) => (stem, None),
        None => (name, None),
    }
}

/// SQLite journal and WAL files live next to the database while it is open
fn is_sidecar_file(name: &str) -> bool {
    name.ends_with("-journal") || name.ends_with("-wal") || name.ends_with("-shm")
}

/// Session ids are restricted to characters that cannot escape the session
/// directory or be confused with the filename separator.
fn is_valid_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Strip any directory components and path separators from an uploaded name
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    base.chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim_matches('.')
        .to_string()
}

/// Pick the session id for a request
///
/// The explicit query parameter is preferred; the value of the `sessionId`
/// cookie is the fallback. Empty values count as absent.
pub fn select_session_id(query: Option<&str>, cookie: Option<&str>) -> Result<String> {
    [query, cookie]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or(SqlviewError::MissingSession)
}
