//! Run reports.

use super::checker::ConsistencyCheck;
use super::strategy::Strategy;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// How far a run got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every requested transaction committed.
    Complete,
    /// Some workers stopped early on a conflict.
    Partial,
    /// The store became unavailable and every worker stopped.
    Aborted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete => f.write_str("complete"),
            Self::Partial => f.write_str("partial"),
            Self::Aborted => f.write_str("aborted"),
        }
    }
}

/// Result of one benchmark run.
#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    /// Strategy under test.
    pub strategy: Strategy,
    /// Backend label.
    pub backend: &'static str,
    /// Concurrent workers.
    pub workers: usize,
    /// Transactions each worker was asked to commit.
    pub transactions_per_worker: usize,
    /// Before/after comparison.
    #[serde(flatten)]
    pub check: ConsistencyCheck,
    /// When the workers were released.
    pub started_at: DateTime<Utc>,
    /// Wall-clock time from first worker start to last join.
    #[serde(rename = "duration_seconds", serialize_with = "as_secs_f64")]
    pub duration: Duration,
    /// Transactions that committed.
    pub committed: u64,
    /// Attempts that were rolled back and retried.
    pub retries: u64,
    /// Workers stopped by an unretried conflict.
    pub conflict_terminations: usize,
    /// Why the run was aborted, if it was.
    pub abort_cause: Option<String>,
    /// Overall outcome.
    pub status: RunStatus,
}

impl BenchReport {
    /// Committed increments that never showed up in the counter.
    #[must_use]
    pub fn lost_updates(&self) -> i64 {
        i64::try_from(self.committed)
            .unwrap_or(i64::MAX)
            .saturating_sub(self.check.observed_delta)
    }
}

impl fmt::Display for BenchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Strategy:        {} ({})", self.strategy, self.backend)?;
        writeln!(
            f,
            "Workers:         {} x {} transactions",
            self.workers, self.transactions_per_worker
        )?;
        writeln!(f, "Started:         {}", self.started_at.to_rfc3339())?;
        writeln!(f, "Duration:        {:.3}s", self.duration.as_secs_f64())?;
        writeln!(f, "Counter before:  {}", self.check.initial)?;
        writeln!(f, "Counter after:   {}", self.check.final_value)?;
        writeln!(f, "Expected delta:  {}", self.check.expected_delta)?;
        writeln!(f, "Observed delta:  {}", self.check.observed_delta)?;
        writeln!(f, "Difference:      {}", self.check.difference)?;
        writeln!(
            f,
            "Committed:       {} (retries {}, conflict terminations {})",
            self.committed, self.retries, self.conflict_terminations
        )?;
        if self.lost_updates() != 0 {
            writeln!(f, "Lost updates:    {}", self.lost_updates())?;
        }
        if let Some(cause) = &self.abort_cause {
            writeln!(f, "Abort cause:     {cause}")?;
        }
        write!(f, "Status:          {}", self.status)
    }
}

/// Result of an in-process stress run.
#[derive(Debug, Clone, Serialize)]
pub struct StressReport {
    /// Backend label.
    pub backend: &'static str,
    /// Concurrent workers.
    pub workers: usize,
    /// Increments each worker attempted.
    pub increments_per_worker: usize,
    /// Before/after comparison.
    #[serde(flatten)]
    pub check: ConsistencyCheck,
    /// Wall-clock time.
    #[serde(rename = "duration_seconds", serialize_with = "as_secs_f64")]
    pub duration: Duration,
    /// Increments that returned an error.
    pub errors: u64,
    /// First error seen, if any.
    pub first_error: Option<String>,
}

impl StressReport {
    /// Increments per second over the whole run.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn throughput(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.check.expected_delta as f64 / secs
    }
}

impl fmt::Display for StressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Backend:         {}", self.backend)?;
        writeln!(
            f,
            "Workers:         {} x {} increments",
            self.workers, self.increments_per_worker
        )?;
        writeln!(
            f,
            "Duration:        {:.3}s ({:.0} ops/s)",
            self.duration.as_secs_f64(),
            self.throughput()
        )?;
        writeln!(f, "Counter before:  {}", self.check.initial)?;
        writeln!(f, "Counter after:   {}", self.check.final_value)?;
        writeln!(f, "Expected delta:  {}", self.check.expected_delta)?;
        writeln!(f, "Observed delta:  {}", self.check.observed_delta)?;
        write!(f, "Errors:          {}", self.errors)?;
        if let Some(e) = &self.first_error {
            write!(f, " (first: {e})")?;
        }
        Ok(())
    }
}

fn as_secs_f64<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}
