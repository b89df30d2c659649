//! Concurrency-control benchmark harness.
//!
//! The harness resets the counter, starts `workers` OS threads behind a
//! barrier, and has each run `transactions_per_worker` transactions of
//! one [`Strategy`] on its own [`CounterSession`](crate::storage::CounterSession).
//! The [`checker`] reads the counter before and after.
//!
//! ```text
//! reset ─► read (before) ─► spawn W workers ─► barrier ─► T transactions each ─► join ─► read (after)
//! ```
//!
//! # Failure handling
//!
//! | Error in a worker | Effect |
//! |-------------------|--------|
//! | `Conflict` | that worker stops; the run becomes [`RunStatus::Partial`] |
//! | anything else | every worker stops before its next transaction; [`RunStatus::Aborted`] |

pub mod checker;
mod report;
mod strategy;
mod stress;

pub use checker::{ConsistencyCheck, Snapshot};
pub use report::{BenchReport, RunStatus, StressReport};
pub use strategy::{RetryPolicy, Strategy};
pub use stress::run_stress;

use crate::config::BenchSettings;
use crate::storage::TransactionalStore;
use crate::{Error, Result};
use chrono::Utc;
use std::sync::Barrier;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Parameters of one benchmark run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchConfig {
    /// Strategy every worker uses.
    pub strategy: Strategy,
    /// Concurrent workers.
    pub workers: usize,
    /// Transactions each worker commits.
    pub transactions_per_worker: usize,
    /// Retry bounds.
    pub retry: RetryPolicy,
}

impl BenchConfig {
    /// Creates a run configuration with the default retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `workers` or
    /// `transactions_per_worker` is zero.
    pub fn new(strategy: Strategy, workers: usize, transactions_per_worker: usize) -> Result<Self> {
        if workers == 0 || transactions_per_worker == 0 {
            return Err(Error::InvalidInput(
                "workers and transactions per worker must be positive".to_string(),
            ));
        }
        Ok(Self {
            strategy,
            workers,
            transactions_per_worker,
            retry: RetryPolicy::default(),
        })
    }

    /// Creates a run configuration from the `[bench]` section.
    ///
    /// # Errors
    ///
    /// Same as [`BenchConfig::new`], plus [`Error::InvalidInput`] if
    /// `max_attempts` is zero.
    pub fn from_settings(strategy: Strategy, settings: &BenchSettings) -> Result<Self> {
        let config = Self::new(strategy, settings.workers, settings.transactions_per_worker)?
            .with_retry(RetryPolicy {
                backoff: Duration::from_millis(settings.backoff_ms),
                max_attempts: settings.max_attempts,
            });
        config.check_retry()?;
        Ok(config)
    }

    fn check_retry(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(Error::InvalidInput(
                "max attempts per transaction must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Replaces the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Same run with another strategy.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// `workers × transactions_per_worker`.
    #[must_use]
    pub const fn expected_delta(&self) -> u64 {
        (self.workers as u64).saturating_mul(self.transactions_per_worker as u64)
    }
}

/// What one worker got done.
#[derive(Debug, Default)]
struct WorkerOutcome {
    committed: u64,
    retries: u64,
    conflict: bool,
    failure: Option<Error>,
}

/// Drives benchmark runs against one transactional store.
pub struct Harness<'a> {
    store: &'a dyn TransactionalStore,
}

impl<'a> Harness<'a> {
    /// Creates a harness over `store`.
    #[must_use]
    pub const fn new(store: &'a dyn TransactionalStore) -> Self {
        Self { store }
    }

    /// Runs one strategy to completion and reports the outcome.
    ///
    /// A run that hits an unavailable store still returns a report, with
    /// status [`RunStatus::Aborted`], as long as the final read succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a zero retry bound and
    /// [`Error::Configuration`] when the store cannot hold a session per
    /// worker, both before the counter is touched. Otherwise returns the
    /// store's error if the reset or either checker read fails.
    pub fn run(&self, config: &BenchConfig) -> Result<BenchReport> {
        let strategy = config.strategy;
        config.check_retry()?;
        if let Some(limit) = self
            .store
            .max_concurrent_sessions()
            .filter(|&limit| config.workers > limit)
        {
            return Err(Error::Configuration(format!(
                "{} workers need {} concurrent sessions but the {} store allows {limit}; \
                 raise 'pool_max' or lower the worker count",
                config.workers,
                config.workers,
                self.store.backend_name()
            )));
        }
        self.store.reset()?;
        let snapshot = Snapshot::take(self.store)?;

        tracing::info!(
            strategy = strategy.name(),
            backend = self.store.backend_name(),
            workers = config.workers,
            transactions = config.transactions_per_worker,
            "Benchmark run starting"
        );

        let barrier = Barrier::new(config.workers);
        let abort = AtomicBool::new(false);

        let started_at = Utc::now();
        let start = Instant::now();
        let outcomes: Vec<WorkerOutcome> = thread::scope(|scope| {
            let handles: Vec<_> = (0..config.workers)
                .map(|worker| {
                    let barrier = &barrier;
                    let abort = &abort;
                    let store = self.store;
                    scope.spawn(move || run_worker(store, config, barrier, abort, worker))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| WorkerOutcome {
                        failure: Some(Error::unavailable("bench_worker", "worker panicked")),
                        ..WorkerOutcome::default()
                    })
                })
                .collect()
        });
        let duration = start.elapsed();

        let committed = outcomes.iter().map(|o| o.committed).sum();
        let retries = outcomes.iter().map(|o| o.retries).sum();
        let conflict_terminations = outcomes.iter().filter(|o| o.conflict).count();
        let failure = outcomes.into_iter().find_map(|o| o.failure);

        let check = match snapshot.finish(self.store, config.expected_delta()) {
            Ok(check) => check,
            Err(read_error) => {
                return Err(failure.unwrap_or(read_error));
            },
        };

        let status = if failure.is_some() {
            RunStatus::Aborted
        } else if committed < config.expected_delta() {
            RunStatus::Partial
        } else {
            RunStatus::Complete
        };

        metrics::histogram!("tally_bench_run_seconds", "strategy" => strategy.name())
            .record(duration.as_secs_f64());

        tracing::info!(
            strategy = strategy.name(),
            status = %status,
            committed,
            retries,
            observed = check.observed_delta,
            expected = check.expected_delta,
            elapsed_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            "Benchmark run finished"
        );

        Ok(BenchReport {
            strategy,
            backend: self.store.backend_name(),
            workers: config.workers,
            transactions_per_worker: config.transactions_per_worker,
            check,
            started_at,
            duration,
            committed,
            retries,
            conflict_terminations,
            abort_cause: failure.map(|e| e.to_string()),
            status,
        })
    }
}

fn run_worker(
    store: &dyn TransactionalStore,
    config: &BenchConfig,
    barrier: &Barrier,
    abort: &AtomicBool,
    worker: usize,
) -> WorkerOutcome {
    let strategy = config.strategy;
    let session = store.session();
    barrier.wait();

    let mut outcome = WorkerOutcome::default();
    let mut session = match session {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(worker, error = %e, "Could not open session, aborting run");
            abort.store(true, Ordering::Release);
            outcome.failure = Some(e);
            return outcome;
        },
    };

    for _ in 0..config.transactions_per_worker {
        if abort.load(Ordering::Acquire) {
            break;
        }
        match strategy.execute(session.as_mut(), &config.retry, &mut outcome.retries) {
            Ok(()) => outcome.committed += 1,
            Err(e) if e.is_conflict() => {
                tracing::debug!(
                    worker,
                    committed = outcome.committed,
                    error = %e,
                    "Worker stopped by conflict"
                );
                outcome.conflict = true;
                break;
            },
            Err(e) => {
                tracing::warn!(
                    worker,
                    committed = outcome.committed,
                    error = %e,
                    "Worker failed, aborting run"
                );
                abort.store(true, Ordering::Release);
                outcome.failure = Some(e);
                break;
            },
        }
    }

    let name = strategy.name();
    metrics::counter!(
        "tally_bench_transactions_total",
        "strategy" => name,
        "status" => "committed"
    )
    .increment(outcome.committed);
    metrics::counter!("tally_bench_retries_total", "strategy" => name).increment(outcome.retries);
    if outcome.conflict {
        metrics::counter!(
            "tally_bench_transactions_total",
            "strategy" => name,
            "status" => "conflict"
        )
        .increment(1);
    }
    if outcome.failure.is_some() {
        metrics::counter!(
            "tally_bench_transactions_total",
            "strategy" => name,
            "status" => "error"
        )
        .increment(1);
    }

    outcome
}
