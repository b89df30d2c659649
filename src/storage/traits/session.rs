//! Transaction primitives for benchmark workers.

use crate::Result;
use std::fmt;

/// Isolation level requested when a transaction begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    /// The store's default (read-committed or its nearest equivalent).
    ReadCommitted,
    /// The strictest level available (serializable or equivalent).
    Serializable,
}

impl fmt::Display for Isolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadCommitted => f.write_str("read committed"),
            Self::Serializable => f.write_str("serializable"),
        }
    }
}

/// The counter row as seen by one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRow {
    /// Counter value.
    pub value: i64,
    /// Version marker, bumped by every write to the row.
    pub version: i64,
}

/// One worker's private handle on a transactional store.
///
/// A session runs at most one transaction at a time. Every transaction
/// ends in [`commit`](Self::commit) or [`rollback`](Self::rollback);
/// dropping a session mid-transaction rolls it back.
pub trait CounterSession {
    /// Starts a transaction at the given isolation level.
    fn begin(&mut self, isolation: Isolation) -> Result<()>;

    /// Reads the counter row without locking it.
    fn read(&mut self) -> Result<CounterRow>;

    /// Reads the counter row and holds an exclusive lock on it until the
    /// transaction ends.
    fn read_for_update(&mut self) -> Result<CounterRow>;

    /// Overwrites the counter value.
    fn write(&mut self, value: i64) -> Result<()>;

    /// Writes `value` and bumps the version, but only if the version is
    /// still `expected_version`. Returns whether a row was updated.
    fn write_if_version(&mut self, value: i64, expected_version: i64) -> Result<bool>;

    /// Runs `counter = counter + 1` as a single statement.
    fn increment_in_place(&mut self) -> Result<()>;

    /// Commits the current transaction.
    fn commit(&mut self) -> Result<()>;

    /// Rolls back the current transaction. A no-op when none is open.
    fn rollback(&mut self) -> Result<()>;
}
