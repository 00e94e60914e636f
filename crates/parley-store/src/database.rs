//! Snapshot database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation.

use std::path::{Path, PathBuf};

use parley_shared::{Id, Time};
use rusqlite::types::Type;
use rusqlite::{Connection, Row};

use crate::error::Result;
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) a snapshot database at an explicit path.
    ///
    /// Parent directories are created when missing.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "opening snapshot database");

        let conn = Connection::open(path)?;
        Self::configure(conn)
    }

    /// Open a throwaway in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::configure(Connection::open_in_memory()?)
    }

    fn configure(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}

// ---------------------------------------------------------------------------
// Column helpers
// ---------------------------------------------------------------------------

/// Read a TEXT column holding a hyphenated UUID.
pub(crate) fn id_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Id> {
    let text: String = row.get(idx)?;
    text.parse::<Id>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Read an INTEGER column holding milliseconds since the Unix epoch.
pub(crate) fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Time> {
    let millis: i64 = row.get(idx)?;
    Time::from_millis(millis).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
}
