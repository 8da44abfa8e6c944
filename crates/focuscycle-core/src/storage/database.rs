//! SQLite-backed key-value storage.
//!
//! The session snapshot and its writer stamp live in a single `kv` table so
//! that several processes sharing the data directory see each other's
//! writes.

use std::path::Path;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};

use super::data_dir;
use crate::error::{CoreError, DatabaseError};

/// SQLite database holding the shared key-value store.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the database at `~/.config/focuscycle/focuscycle.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, CoreError> {
        Self::open_at(&data_dir()?.join("focuscycle.db"))
    }

    pub fn open_at(path: &Path) -> Result<Self, CoreError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        // Other contexts may hold the write lock briefly.
        conn.busy_timeout(Duration::from_millis(500))?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )
    }

    /// Get a value from the kv store.
    pub fn kv_get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Apply several sets (`Some`) and deletes (`None`) atomically.
    ///
    /// Deleting a missing key is not an error.
    pub fn kv_apply(&self, changes: &[(&str, Option<&str>)]) -> Result<(), DatabaseError> {
        let tx = self.conn.unchecked_transaction()?;
        for (key, value) in changes {
            match value {
                Some(value) => {
                    tx.execute(
                        "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                        params![key, value],
                    )?;
                }
                None => {
                    tx.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}
