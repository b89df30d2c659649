//! `SQLite`-backed transactional counter.
//!
//! A relational [`TransactionalStore`] that needs no server, so every
//! benchmark strategy can run hermetically.
//!
//! # Isolation mapping
//!
//! | Requested | `SQLite` |
//! |---|---|
//! | [`Isolation::ReadCommitted`] | per-statement autocommit; `begin`/`commit` are no-ops |
//! | [`Isolation::Serializable`] | `BEGIN DEFERRED` (`SQLite` transactions are serializable) |
//! | row lock ([`CounterSession::read_for_update`]) | `BEGIN IMMEDIATE` takes the database write lock |
//!
//! Under autocommit a read and the following write are separate
//! transactions, which is what lets the naive strategy lose updates.

use crate::storage::lock::acquire_lock_with_timeout;
use crate::storage::metrics::observe;
use crate::storage::sql::validate_table_name;
use crate::storage::sqlite::{map_sqlite_error, open_connection};
use crate::storage::traits::{
    CounterRow, CounterSession, CounterStore, Isolation, TransactionalStore,
};
use crate::storage::{COUNTER_KEY, DEFAULT_TABLE};
use crate::{Error, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::instrument;

/// Default statement busy timeout.
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// SQL text for one table, built once at construction.
#[derive(Debug)]
struct Queries {
    create: String,
    seed: String,
    read: String,
    increment: String,
    write: String,
    write_if_version: String,
    reset: String,
}

impl Queries {
    fn new(table: &str) -> Self {
        Self {
            create: format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    user_id INTEGER PRIMARY KEY,
                    counter INTEGER NOT NULL DEFAULT 0,
                    version INTEGER NOT NULL DEFAULT 0
                )"
            ),
            seed: format!(
                "INSERT OR IGNORE INTO {table} (user_id, counter, version) VALUES (?1, 0, 0)"
            ),
            read: format!("SELECT counter, version FROM {table} WHERE user_id = ?1"),
            increment: format!(
                "UPDATE {table} SET counter = counter + 1, version = version + 1 WHERE user_id = ?1"
            ),
            write: format!(
                "UPDATE {table} SET counter = ?2, version = version + 1 WHERE user_id = ?1"
            ),
            write_if_version: format!(
                "UPDATE {table} SET counter = ?2, version = version + 1
                 WHERE user_id = ?1 AND version = ?3"
            ),
            reset: format!(
                "INSERT INTO {table} (user_id, counter, version) VALUES (?1, 0, 0)
                 ON CONFLICT(user_id) DO UPDATE SET counter = 0, version = 0"
            ),
        }
    }
}

/// Counter stored in one row of a `SQLite` table.
///
/// # Concurrency Model
///
/// [`CounterStore`] increments share one writer connection and reads share
/// one reader connection. Each call is a single autocommit statement, so
/// `counter = counter + 1` is atomic without any application lock around
/// the read-modify-write. WAL lets the reader proceed while a writer holds
/// the database lock, and waiting for either connection is bounded by the
/// operation timeout. Sessions open their own connection, which is what the
/// benchmark needs to produce real contention.
///
/// # Schema
///
/// `{table}(user_id INTEGER PRIMARY KEY, counter INTEGER, version INTEGER)`
/// with the single row `user_id = 1` seeded at `(0, 0)`.
#[derive(Debug)]
pub struct SqliteCounter {
    /// Connection for plain increments and resets; `None` once closed.
    conn: Mutex<Option<Connection>>,
    /// Connection for plain reads; `None` once closed.
    reader: Mutex<Option<Connection>>,
    /// Set once by [`CounterStore::close`].
    closed: AtomicBool,
    db_path: PathBuf,
    table: String,
    queries: Queries,
    operation_timeout: Duration,
}

impl SqliteCounter {
    /// Opens the database, creating the table and seed row if missing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for an invalid table name and
    /// [`Error::StorageUnavailable`] if the database cannot be opened.
    pub fn new(
        db_path: impl Into<PathBuf>,
        table: &str,
        operation_timeout: Duration,
    ) -> Result<Self> {
        let table = validate_table_name(table)?.to_string();
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::unavailable("create_sqlite_dir", e))?;
        }

        let conn = open_connection(&db_path, operation_timeout)?;
        let queries = Queries::new(&table);

        conn.execute(&queries.create, [])
            .map_err(|e| map_sqlite_error("create_counter_table", &e, false))?;
        conn.execute(&queries.seed, params![COUNTER_KEY])
            .map_err(|e| map_sqlite_error("seed_counter_row", &e, false))?;
        let reader = open_connection(&db_path, operation_timeout)?;

        tracing::info!(path = %db_path.display(), table = %table, "SQLite counter ready");

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            reader: Mutex::new(Some(reader)),
            closed: AtomicBool::new(false),
            db_path,
            table,
            queries,
            operation_timeout,
        })
    }

    /// Opens `db_path` with the default table and timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageUnavailable`] if the database cannot be opened.
    pub fn with_defaults(db_path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(db_path, DEFAULT_TABLE, DEFAULT_OPERATION_TIMEOUT)
    }

    /// Returns the database path.
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Returns the counter table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Runs `f` on `slot`, waiting at most the operation timeout for it.
    fn with_connection<T>(
        &self,
        slot: &Mutex<Option<Connection>>,
        operation: &'static str,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        let start = Instant::now();
        let result = acquire_lock_with_timeout(slot, operation, self.operation_timeout).and_then(
            |guard| match guard.as_ref() {
                Some(conn) => f(conn),
                None => Err(Error::unavailable(operation, "sqlite counter is closed")),
            },
        );
        observe("sqlite", operation, start, result)
    }
}

/// Reads the counter row, failing if it has gone missing.
fn read_row(conn: &Connection, sql: &str, table: &str, in_transaction: bool) -> Result<CounterRow> {
    conn.prepare_cached(sql)
        .and_then(|mut stmt| {
            stmt.query_row(params![COUNTER_KEY], |row| {
                Ok(CounterRow {
                    value: row.get(0)?,
                    version: row.get(1)?,
                })
            })
            .optional()
        })
        .map_err(|e| map_sqlite_error("read_counter", &e, in_transaction))?
        .ok_or_else(|| Error::corrupt(table, format!("counter row user_id={COUNTER_KEY} missing")))
}

fn to_unsigned(table: &str, value: i64) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| Error::corrupt(table, format!("counter value {value} is negative")))
}

impl CounterStore for SqliteCounter {
    #[instrument(skip(self), fields(backend = "sqlite", table = %self.table))]
    fn increment(&self) -> Result<()> {
        self.with_connection(&self.conn, "increment", |conn| {
            let changed = conn
                .prepare_cached(&self.queries.increment)
                .and_then(|mut stmt| stmt.execute(params![COUNTER_KEY]))
                .map_err(|e| map_sqlite_error("increment", &e, false))?;
            if changed == 0 {
                return Err(Error::corrupt(
                    &self.table,
                    format!("counter row user_id={COUNTER_KEY} missing"),
                ));
            }
            metrics::counter!("tally_increments_total", "backend" => "sqlite").increment(1);
            Ok(())
        })
    }

    #[instrument(skip(self), fields(backend = "sqlite", table = %self.table))]
    fn read(&self) -> Result<u64> {
        self.with_connection(&self.reader, "read", |conn| {
            let row = read_row(conn, &self.queries.read, &self.table, false)?;
            metrics::counter!("tally_reads_total", "backend" => "sqlite").increment(1);
            to_unsigned(&self.table, row.value)
        })
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        for slot in [&self.reader, &self.conn] {
            if let Some(conn) = slot.lock().take() {
                conn.close()
                    .map_err(|(_, e)| map_sqlite_error("close_sqlite", &e, false))?;
            }
        }
        tracing::debug!(path = %self.db_path.display(), "SQLite counter closed");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

impl TransactionalStore for SqliteCounter {
    fn session(&self) -> Result<Box<dyn CounterSession + '_>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::unavailable("open_session", "sqlite counter is closed"));
        }
        let conn = open_connection(&self.db_path, self.operation_timeout)?;
        Ok(Box::new(SqliteSession {
            conn,
            table: &self.table,
            queries: &self.queries,
        }))
    }

    #[instrument(skip(self), fields(backend = "sqlite", table = %self.table))]
    fn reset(&self) -> Result<()> {
        self.with_connection(&self.conn, "reset", |conn| {
            conn.execute(&self.queries.reset, params![COUNTER_KEY])
                .map_err(|e| map_sqlite_error("reset", &e, false))?;
            tracing::debug!(table = %self.table, "Counter reset");
            Ok(())
        })
    }
}

/// One worker's connection to the counter database.
struct SqliteSession<'a> {
    conn: Connection,
    table: &'a str,
    queries: &'a Queries,
}

impl SqliteSession<'_> {
    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn batch(&self, operation: &str, sql: &str) -> Result<()> {
        let in_tx = self.in_transaction();
        self.conn
            .execute_batch(sql)
            .map_err(|e| map_sqlite_error(operation, &e, in_tx))
    }

    fn update(&self, operation: &str, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<usize> {
        let in_tx = self.in_transaction();
        self.conn
            .prepare_cached(sql)
            .and_then(|mut stmt| stmt.execute(params))
            .map_err(|e| map_sqlite_error(operation, &e, in_tx))
    }
}

impl CounterSession for SqliteSession<'_> {
    fn begin(&mut self, isolation: Isolation) -> Result<()> {
        if self.in_transaction() {
            return Err(Error::InvalidInput(
                "a transaction is already open on this session".to_string(),
            ));
        }
        match isolation {
            Isolation::ReadCommitted => Ok(()),
            Isolation::Serializable => self.batch("begin", "BEGIN DEFERRED"),
        }
    }

    fn read(&mut self) -> Result<CounterRow> {
        read_row(&self.conn, &self.queries.read, self.table, self.in_transaction())
    }

    fn read_for_update(&mut self) -> Result<CounterRow> {
        if !self.in_transaction() {
            self.batch("lock_row", "BEGIN IMMEDIATE")?;
        }
        self.read()
    }

    fn write(&mut self, value: i64) -> Result<()> {
        self.update("write", &self.queries.write, &[&COUNTER_KEY, &value])
            .map(|_| ())
    }

    fn write_if_version(&mut self, value: i64, expected_version: i64) -> Result<bool> {
        let changed = self.update(
            "write_if_version",
            &self.queries.write_if_version,
            &[&COUNTER_KEY, &value, &expected_version],
        )?;
        Ok(changed == 1)
    }

    fn increment_in_place(&mut self) -> Result<()> {
        self.update("increment_in_place", &self.queries.increment, &[&COUNTER_KEY])
            .map(|_| ())
    }

    fn commit(&mut self) -> Result<()> {
        if self.in_transaction() {
            self.batch("commit", "COMMIT")?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if self.in_transaction() {
            self.batch("rollback", "ROLLBACK")?;
        }
        Ok(())
    }
}

impl Drop for SqliteSession<'_> {
    fn drop(&mut self) {
        if self.in_transaction() {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::warn!(error = %e, "Failed to roll back abandoned SQLite transaction");
            }
        }
    }
}
