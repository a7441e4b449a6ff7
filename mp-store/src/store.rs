//! Store lifecycle: persistent, ephemeral, and in-memory modes.

use crate::ephemeral::EphemeralGuard;
use duckdb::{AccessMode, Config, Connection};
use mp_core::accounts::APP_DIR;
use mp_core::{Error, Result};
use std::path::{Path, PathBuf};

/// Reserved internal table holding one metadata row per user table.
/// Excluded from every external listing.
pub const METADATA_TABLE: &str = "_metadata";

/// An embedded analytical store. One instance owns the underlying file;
/// services borrow the instance and never open a second handle.
pub struct Store {
    pub(crate) conn: Connection,
    path: Option<PathBuf>,
    read_only: bool,
    _ephemeral: Option<EphemeralGuard>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open (or create) a persistent store file with write intent.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::query(format!("failed to create {}: {e}", parent.display()))
                })?;
            }
        }
        let conn = Connection::open(&path).map_err(|e| open_error(&path, e))?;
        bootstrap(&conn)?;
        Ok(Store { conn, path: Some(path), read_only: false, _ephemeral: None })
    }

    /// Default per-project location: `~/.mixpanel_data/{project_id}.db`.
    pub fn for_project(project_id: &str) -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::config("could not determine home directory"))?;
        Self::open(home.join(APP_DIR).join(format!("{project_id}.db")))
    }

    /// Read-only open; succeeds alongside a concurrent writer.
    pub fn open_read_only(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(Error::DatabaseNotFound { path: path.display().to_string() });
        }
        let config = Config::default()
            .access_mode(AccessMode::ReadOnly)
            .map_err(|e| Error::query(format!("failed to configure read-only mode: {e}")))?;
        let conn =
            Connection::open_with_flags(&path, config).map_err(|e| open_error(&path, e))?;
        Ok(Store { conn, path: Some(path), read_only: true, _ephemeral: None })
    }

    /// Zero-disk-footprint store.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::query(format!("failed to open in-memory store: {e}")))?;
        bootstrap(&conn)?;
        Ok(Store { conn, path: None, read_only: false, _ephemeral: None })
    }

    /// Temp-file-backed store, deleted when the instance drops. Anything
    /// still alive at shutdown can be swept with
    /// [`crate::ephemeral::cleanup_registered`].
    pub fn ephemeral() -> Result<Self> {
        let guard = EphemeralGuard::new()
            .map_err(|e| Error::query(format!("failed to create temp store: {e}")))?;
        let conn = Connection::open(guard.path()).map_err(|e| open_error(guard.path(), e))?;
        bootstrap(&conn)?;
        Ok(Store {
            conn,
            path: Some(guard.path().to_path_buf()),
            read_only: false,
            _ephemeral: Some(guard),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Close explicitly, surfacing any flush error. Dropping the store
    /// closes it too; this is for callers that want the error.
    pub fn close(self) -> Result<()> {
        let Store { conn, path, _ephemeral, .. } = self;
        conn.close().map_err(|(_conn, e)| {
            Error::query(format!("failed to close store: {e}"))
        })?;
        drop(_ephemeral);
        drop(path);
        Ok(())
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::query("store is opened read-only"));
        }
        Ok(())
    }

    pub(crate) fn table_exists(&self, name: &str) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT count(*) FROM information_schema.tables \
                 WHERE table_schema = 'main' AND table_name = ?",
            )
            .map_err(|e| Error::query(format!("failed to inspect tables: {e}")))?;
        let count: i64 = stmt
            .query_row([name], |row| row.get(0))
            .map_err(|e| Error::query(format!("failed to inspect tables: {e}")))?;
        Ok(count > 0)
    }
}

fn bootstrap(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {METADATA_TABLE} (
            table_name VARCHAR PRIMARY KEY,
            table_type VARCHAR NOT NULL,
            fetched_at TIMESTAMP NOT NULL,
            from_date DATE,
            to_date DATE,
            filter_events VARCHAR,
            filter_where VARCHAR,
            filter_cohort_id BIGINT,
            filter_group_id VARCHAR,
            filter_behaviors VARCHAR,
            row_count BIGINT NOT NULL
        )"
    ))
    .map_err(|e| Error::query(format!("failed to initialize metadata table: {e}")))
}

/// Convert an engine open failure into the taxonomy. DuckDB reports a held
/// write lock with a "Conflicting lock" / "Could not set lock" message.
fn open_error(path: &Path, e: duckdb::Error) -> Error {
    let message = e.to_string();
    let lower = message.to_lowercase();
    if lower.contains("lock") {
        Error::DatabaseLocked { path: path.display().to_string() }
    } else if lower.contains("no such file") || lower.contains("does not exist") {
        Error::DatabaseNotFound { path: path.display().to_string() }
    } else {
        Error::query(format!("failed to open {}: {message}", path.display()))
    }
}

/// Quote an identifier for interpolation into SQL.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal for interpolation into SQL.
pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
