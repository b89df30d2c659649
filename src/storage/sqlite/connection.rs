//! Connection handling for `SQLite`.

use super::error::map_sqlite_error;
use crate::Result;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// Opens `path` and applies [`configure_connection`].
///
/// # Errors
///
/// Returns [`crate::Error::StorageUnavailable`] if the database cannot be
/// opened or configured.
pub fn open_connection(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open(path).map_err(|e| map_sqlite_error("open_sqlite", &e, false))?;
    configure_connection(&conn, busy_timeout)?;
    Ok(conn)
}

/// Configures a connection for concurrent counter access.
///
/// - **WAL mode**: readers never block the writer
/// - **NORMAL synchronous**: durable at checkpoints, fast commits
/// - **`busy_timeout`**: how long a statement outside a transaction waits
///   for the write lock before failing
///
/// `SQLite` does not invoke the busy handler when a transaction that already
/// holds a read snapshot tries to upgrade to a write; that case fails at
/// once and is reported as a conflict by [`map_sqlite_error`].
///
/// # Errors
///
/// Returns [`crate::Error::StorageUnavailable`] if a pragma cannot be applied.
pub fn configure_connection(conn: &Connection, busy_timeout: Duration) -> Result<()> {
    let mode: String = conn
        .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
        .map_err(|e| map_sqlite_error("configure_journal_mode", &e, false))?;
    if !mode.eq_ignore_ascii_case("wal") {
        // In-memory databases report "memory"
        tracing::debug!(journal_mode = %mode, "SQLite WAL mode unavailable");
    }

    conn.pragma_update(None, "synchronous", "NORMAL")
        .map_err(|e| map_sqlite_error("configure_synchronous", &e, false))?;
    conn.busy_timeout(busy_timeout)
        .map_err(|e| map_sqlite_error("configure_busy_timeout", &e, false))?;

    Ok(())
}
