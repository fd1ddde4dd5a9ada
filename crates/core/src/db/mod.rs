//! SQLite persistence for cycles, phases, schedules, permission matrices,
//! sub-phases and the audit log.
//!
//! A single [`Database`] is shared by the web handlers, the phase watcher
//! and the CLI through an `Arc`. Every guarded write (schedule save, matrix
//! replacement, sub-phase transition) runs inside [`Database::transaction`],
//! which takes the write lock up front so the guard sees the same rows the
//! write changes.

pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::errors::DatabaseError;

/// How long a second process (e.g. the CLI next to the server) waits on a
/// locked database before giving up.
const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Shared handle to the orchestrator's SQLite store.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file at `path` in WAL mode.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening database");

        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            warn!(%mode, "database did not switch to WAL journaling");
        }
        configure(&conn)?;

        debug!(%mode, "database opened");
        Ok(Self::wrap(conn))
    }

    /// A private in-memory database. Nothing survives the handle.
    pub fn in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        configure(&conn)?;
        Ok(Self::wrap(conn))
    }

    fn wrap(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Apply pending migrations (tables, then seeded actions, roles and the
    /// role matrix). Returns the resulting schema version.
    pub fn initialize(&self) -> Result<u32, DatabaseError> {
        let conn = self.conn();
        let before = schema::get_schema_version(&conn)?;
        schema::run_migrations(&conn)?;
        let after = schema::get_schema_version(&conn)?;
        if after != before {
            info!(from = before, to = after, "migrated database schema");
        } else {
            debug!(version = after, "database schema is up to date");
        }
        Ok(after)
    }

    /// Lock the connection. A poisoned lock is recovered; SQLite itself
    /// rolls back whatever transaction the panicking holder left open.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("database mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Run `f` in an `IMMEDIATE` transaction: committed on `Ok`, rolled back
    /// on `Err`. Domain rejections travel out as
    /// [`DatabaseError::Rejected`](crate::errors::DatabaseError::Rejected).
    pub fn transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

fn configure(conn: &Connection) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.pragma_update(None, "busy_timeout", BUSY_TIMEOUT_MS)?;
    Ok(())
}
