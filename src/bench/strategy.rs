//! Concurrency-control strategies.
//!
//! Each strategy is one transaction body built from [`CounterSession`]
//! primitives. The body either commits exactly one logical increment or
//! returns an error with the transaction rolled back.

use crate::storage::{CounterRow, CounterSession, Isolation};
use crate::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Retry bounds for the strategies that retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Sleep between `serializable-retry` attempts.
    pub backoff: Duration,
    /// Attempts per logical transaction before giving up with a conflict.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(1),
            max_attempts: 10_000,
        }
    }
}

/// How a worker protects its read-modify-write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Read, add one, write back at default isolation. Loses updates.
    LostUpdate,
    /// Same body at serializable isolation; a conflict is not retried.
    Serializable,
    /// Serializable isolation, retrying conflicts after a fixed backoff.
    SerializableRetry,
    /// One `counter = counter + 1` statement.
    InPlace,
    /// Exclusive row lock held from read through commit.
    RowLock,
    /// Version-guarded write, retried until the version matches.
    Optimistic,
}

impl Strategy {
    /// Every strategy, in report order.
    pub const ALL: [Self; 6] = [
        Self::LostUpdate,
        Self::Serializable,
        Self::SerializableRetry,
        Self::InPlace,
        Self::RowLock,
        Self::Optimistic,
    ];

    /// Stable command-line name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::LostUpdate => "lost-update",
            Self::Serializable => "serializable",
            Self::SerializableRetry => "serializable-retry",
            Self::InPlace => "in-place",
            Self::RowLock => "row-lock",
            Self::Optimistic => "optimistic",
        }
    }

    /// Heading printed above the strategy's report.
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::LostUpdate => "Lost update (read-modify-write, read committed)",
            Self::Serializable => "Serializable isolation without retry",
            Self::SerializableRetry => "Serializable isolation with retry",
            Self::InPlace => "In-place update",
            Self::RowLock => "Row-level locking",
            Self::Optimistic => "Optimistic concurrency control",
        }
    }

    /// Isolation level the transaction starts with.
    #[must_use]
    pub const fn isolation(self) -> Isolation {
        match self {
            Self::Serializable | Self::SerializableRetry => Isolation::Serializable,
            Self::LostUpdate | Self::InPlace | Self::RowLock | Self::Optimistic => {
                Isolation::ReadCommitted
            },
        }
    }

    /// Whether every committed transaction is expected to land.
    #[must_use]
    pub const fn preserves_increments(self) -> bool {
        !matches!(self, Self::LostUpdate)
    }

    /// Runs one logical transaction to commit.
    ///
    /// `retries` is bumped once per failed attempt that was retried, even
    /// when the transaction finally gives up.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] when a non-retrying strategy hits a
    /// conflict or a retrying one exhausts `policy.max_attempts`, and any
    /// other storage error unchanged. The transaction is rolled back
    /// before returning.
    pub fn execute(
        self,
        session: &mut dyn CounterSession,
        policy: &RetryPolicy,
        retries: &mut u64,
    ) -> Result<()> {
        match self {
            Self::LostUpdate | Self::Serializable => attempt(session, self.isolation(), |s| {
                let row = s.read()?;
                s.write(next_value(&row)?)
            }),
            Self::InPlace => attempt(session, Isolation::ReadCommitted, |s| {
                s.increment_in_place()
            }),
            Self::RowLock => attempt(session, Isolation::ReadCommitted, |s| {
                let row = s.read_for_update()?;
                s.write(next_value(&row)?)
            }),
            Self::SerializableRetry => serializable_with_retry(session, policy, retries),
            Self::Optimistic => optimistic(session, policy, retries),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.name() == wanted)
            .ok_or_else(|| {
                let names: Vec<_> = Self::ALL.iter().map(|s| s.name()).collect();
                Error::InvalidInput(format!(
                    "unknown strategy '{s}' (expected one of: {})",
                    names.join(", ")
                ))
            })
    }
}

/// The value a read-modify-write stores back.
fn next_value(row: &CounterRow) -> Result<i64> {
    row.value.checked_add(1).ok_or_else(|| {
        Error::corrupt("counter", format!("value {} cannot be incremented", row.value))
    })
}

/// Begin, run `body`, commit. Rolls back on any failure.
fn attempt<F>(session: &mut dyn CounterSession, isolation: Isolation, body: F) -> Result<()>
where
    F: FnOnce(&mut dyn CounterSession) -> Result<()>,
{
    session.begin(isolation)?;
    let result = body(session).and_then(|()| session.commit());
    if let Err(e) = result {
        abandon(session);
        return Err(e);
    }
    Ok(())
}

fn abandon(session: &mut dyn CounterSession) {
    if let Err(e) = session.rollback() {
        tracing::debug!(error = %e, "Rollback after failed attempt also failed");
    }
}

fn serializable_with_retry(
    session: &mut dyn CounterSession,
    policy: &RetryPolicy,
    retries: &mut u64,
) -> Result<()> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match attempt(session, Isolation::Serializable, |s| {
            let row = s.read()?;
            s.write(next_value(&row)?)
        }) {
            Ok(()) => return Ok(()),
            Err(e) if e.is_conflict() && attempts < policy.max_attempts => {
                *retries += 1;
                tracing::trace!(attempts, error = %e, "Serialization conflict, backing off");
                std::thread::sleep(policy.backoff);
            },
            Err(e) if e.is_conflict() => {
                return Err(Error::conflict(
                    "serializable_retry",
                    format!("gave up after {attempts} attempts: {e}"),
                ));
            },
            Err(e) => return Err(e),
        }
    }
}

fn optimistic(
    session: &mut dyn CounterSession,
    policy: &RetryPolicy,
    retries: &mut u64,
) -> Result<()> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        session.begin(Isolation::ReadCommitted)?;
        let written = session
            .read()
            .and_then(|row| session.write_if_version(next_value(&row)?, row.version));

        match written {
            Ok(true) => {
                if let Err(e) = session.commit() {
                    abandon(session);
                    return Err(e);
                }
                return Ok(());
            },
            Ok(false) => abandon(session),
            Err(e) => {
                abandon(session);
                return Err(e);
            },
        }

        if attempts >= policy.max_attempts {
            return Err(Error::conflict(
                "optimistic_write",
                format!("version kept changing for {attempts} attempts"),
            ));
        }
        *retries += 1;
        std::thread::yield_now();
    }
}
