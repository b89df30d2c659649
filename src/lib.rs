//! # Tally
//!
//! A single shared counter that many callers increment and read concurrently,
//! backed by interchangeable storage engines.
//!
//! The counter itself is trivial. What this crate is about is keeping
//! increments correct when the storage media have very different native
//! consistency guarantees, and measuring which concurrency-control strategy
//! actually preserves correctness when transactions race to
//! read-modify-write the same row.
//!
//! ## Features
//!
//! - One [`CounterStore`] contract, several backends (in-memory, flat file,
//!   `SQLite`, PostgreSQL, Redis, MongoDB, Cassandra)
//! - A concurrency-control benchmark harness with six strategies
//!   ([`bench::Strategy`])
//! - A consistency checker that compares expected and observed deltas
//! - Optional HTTP surface (`/inc`, `/count`) and an HTTP load client
//!
//! ## Example
//!
//! ```rust
//! use tally::storage::{CounterStore, InMemoryCounter};
//!
//! let counter = InMemoryCounter::new();
//! counter.increment()?;
//! counter.increment()?;
//! assert_eq!(counter.read()?, 2);
//! # Ok::<(), tally::Error>(())
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod bench;
pub mod cli;
pub mod config;
pub mod http;
pub mod observability;
pub mod storage;

pub use bench::{BenchConfig, BenchReport, Harness, RetryPolicy, RunStatus, Strategy};
pub use config::{BackendConfig, TallyConfig};
pub use storage::{
    BackendFactory, CounterSession, CounterStore, FileCounter, InMemoryCounter, SqliteCounter,
    TransactionalStore,
};

/// Error type for tally operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `Configuration` | Unknown backend kind, missing required keys, invalid table name |
/// | `StorageUnavailable` | I/O errors, unreachable store, pool exhaustion, timeouts, closed store |
/// | `StorageCorrupt` | Persisted value is not a non-negative integer, counter row missing |
/// | `Conflict` | The store aborted a transaction because a concurrent writer broke isolation |
/// | `InvalidInput` | Malformed command-line input |
/// | `FeatureNotEnabled` | A backend or command needs a Cargo feature that was not compiled in |
#[derive(Debug, ThisError)]
pub enum Error {
    /// The backend configuration is unusable.
    ///
    /// Fatal at startup and never recovered.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The storage medium could not be reached or an operation timed out.
    ///
    /// Propagated to the caller; the counter abstraction never retries it.
    #[error("storage unavailable during '{operation}': {cause}")]
    StorageUnavailable {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// Persisted state could not be interpreted as a counter value.
    ///
    /// Never auto-repaired.
    #[error("storage corrupt at {location}: {cause}")]
    StorageCorrupt {
        /// Where the bad value lives (file path, table, key).
        location: String,
        /// What was wrong with it.
        cause: String,
    },

    /// A transaction was aborted by the store because committing it would
    /// violate its isolation guarantee.
    ///
    /// Raised only by transactional stores. Benchmark strategies decide
    /// whether to retry it.
    #[error("transaction conflict during '{operation}': {cause}")]
    Conflict {
        /// The operation that hit the conflict.
        operation: String,
        /// The store's error message.
        cause: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Feature not enabled (requires feature flag).
    #[error("feature not enabled: {0} (compile with --features {0})")]
    FeatureNotEnabled(String),
}

impl Error {
    /// Builds a [`Error::StorageUnavailable`] from any displayable cause.
    pub fn unavailable(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::StorageUnavailable {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    /// Builds a [`Error::StorageCorrupt`] from any displayable cause.
    pub fn corrupt(location: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::StorageCorrupt {
            location: location.into(),
            cause: cause.to_string(),
        }
    }

    /// Builds a [`Error::Conflict`] from any displayable cause.
    pub fn conflict(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Conflict {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    /// Returns true for transaction-level conflicts.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns true when the storage medium is unreachable or timed out.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::StorageUnavailable { .. })
    }

    /// Short stable label used for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::StorageUnavailable { .. } => "unavailable",
            Self::StorageCorrupt { .. } => "corrupt",
            Self::Conflict { .. } => "conflict",
            Self::InvalidInput(_) => "invalid_input",
            Self::FeatureNotEnabled(_) => "feature_not_enabled",
        }
    }
}

/// Result type alias for tally operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Configuration("missing 'file_path'".to_string());
        assert_eq!(err.to_string(), "configuration error: missing 'file_path'");

        let err = Error::unavailable("file_read", "permission denied");
        assert_eq!(
            err.to_string(),
            "storage unavailable during 'file_read': permission denied"
        );

        let err = Error::corrupt("counter.txt", "invalid digit found in string");
        assert_eq!(
            err.to_string(),
            "storage corrupt at counter.txt: invalid digit found in string"
        );
    }

    #[test]
    fn test_conflict_and_unavailable_are_distinct() {
        let conflict = Error::conflict("commit", "could not serialize access");
        let timeout = Error::unavailable("commit", "statement timeout");

        assert!(conflict.is_conflict());
        assert!(!conflict.is_unavailable());
        assert!(timeout.is_unavailable());
        assert!(!timeout.is_conflict());
        assert_eq!(conflict.kind(), "conflict");
        assert_eq!(timeout.kind(), "unavailable");
    }
}
