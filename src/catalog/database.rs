//! SQLite connection shared by the root registry and the catalog store.
//!
//! One connection behind a mutex. Every statement the engine issues is
//! short, so serializing them costs little, and readers querying the
//! catalog mid-scan always see committed rows only.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Transaction};

/// Current schema version, stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Location string that selects an in-memory database.
pub const IN_MEMORY: &str = ":memory:";

/// SQLite-backed store for storage roots and file records.
#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open (creating if needed) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or the schema cannot be applied.
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Fails only if SQLite cannot allocate the database.
    pub fn open_in_memory() -> rusqlite::Result<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    /// Open `location`, treating `:memory:` as an in-memory database.
    ///
    /// # Errors
    ///
    /// See [`Database::open`].
    pub fn open_location(location: &str) -> rusqlite::Result<Self> {
        if location == IN_MEMORY {
            Self::open_in_memory()
        } else {
            Self::open(Path::new(location))
        }
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> rusqlite::Result<Self> {
        configure_pragmas(&conn, path.is_some())?;
        migrate_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Database file path, `None` for in-memory databases.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with the connection locked.
    ///
    /// # Errors
    ///
    /// Whatever `f` returns.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> rusqlite::Result<T> {
        f(&self.lock())
    }

    /// Run `f` inside a transaction, committing when it returns `Ok`.
    ///
    /// # Errors
    ///
    /// Whatever `f` returns, or the commit failure. The transaction is
    /// rolled back on error.
    pub fn with_tx<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> rusqlite::Result<T>,
    ) -> rusqlite::Result<T> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

fn configure_pragmas(conn: &Connection, on_disk: bool) -> rusqlite::Result<()> {
    if on_disk {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
    }
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )?;
    log::debug!("SQLite pragmas configured (wal: {on_disk})");
    Ok(())
}

fn migrate_schema(conn: &Connection) -> rusqlite::Result<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version > SCHEMA_VERSION {
        log::warn!("Catalog schema version {version} is newer than {SCHEMA_VERSION}");
    }
    conn.execute_batch(include_str!("schema.sql"))?;
    if version < SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        log::debug!("Catalog schema migrated from version {version} to {SCHEMA_VERSION}");
    }
    Ok(())
}

/// Format a timestamp for storage.
#[must_use]
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

/// Parse a stored timestamp from column `idx`.
///
/// # Errors
///
/// `FromSqlConversionFailure` when the text is not RFC 3339.
pub fn parse_timestamp(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_in_memory_has_schema() {
        let db = Database::open_in_memory().unwrap();
        let tables: i64 = db
            .with_conn(|c| {
                c.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' \
                     AND name IN ('storage_roots', 'file_records', 'scan_generations')",
                    [],
                    |row| row.get(0),
                )
            })
            .unwrap();
        assert_eq!(tables, 3);
        assert!(db.path().is_none());
    }

    #[test]
    fn test_reopen_keeps_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.db");
        drop(Database::open(&path).unwrap());
        let db = Database::open(&path).unwrap();
        let version: i64 = db
            .with_conn(|c| c.query_row("PRAGMA user_version", [], |row| row.get(0)))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
        assert_eq!(db.path(), Some(path.as_path()));
    }

    #[test]
    fn test_with_tx_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let result: rusqlite::Result<()> = db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO storage_roots (name, protocol, max_depth, created_at, updated_at) \
                 VALUES ('a', 'local', 10, 'x', 'x')",
                [],
            )?;
            Err(rusqlite::Error::QueryReturnedNoRows)
        });
        assert!(result.is_err());
        let count: i64 = db
            .with_conn(|c| c.query_row("SELECT COUNT(*) FROM storage_roots", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_timestamp_round_trip() {
        let now = Utc::now();
        let parsed = parse_timestamp(0, &format_timestamp(now)).unwrap();
        assert_eq!(parsed, now);
        assert!(parse_timestamp(3, "yesterday").is_err());
    }
}
