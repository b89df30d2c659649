//! Benchmark strategies against `SQLite`.
//!
//! `SQLite` gives real lock contention and real serialization failures
//! without a server, so every strategy can be checked end to end:
//! - correct strategies land every increment
//! - the lost-update strategy can lose increments
//! - serializable-without-retry never loses a committed increment, but may
//!   stop workers early

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::time::{Duration, Instant};
use tally::bench::{BenchConfig, Harness, RetryPolicy, RunStatus, Strategy};
use tally::storage::{CounterStore, SqliteCounter, TransactionalStore};
use tempfile::TempDir;
use test_case::test_case;

const WORKERS: usize = 4;
const TRANSACTIONS: usize = 50;

fn store(dir: &TempDir) -> SqliteCounter {
    SqliteCounter::new(
        dir.path().join("bench.db"),
        "user_counter",
        Duration::from_secs(30),
    )
    .unwrap()
}

fn config(strategy: Strategy) -> BenchConfig {
    BenchConfig::new(strategy, WORKERS, TRANSACTIONS)
        .unwrap()
        .with_retry(RetryPolicy {
            backoff: Duration::from_millis(1),
            max_attempts: 100_000,
        })
}

#[test_case(Strategy::SerializableRetry; "serializable with retry")]
#[test_case(Strategy::InPlace; "in place")]
#[test_case(Strategy::RowLock; "row lock")]
#[test_case(Strategy::Optimistic; "optimistic")]
fn test_correct_strategies_land_every_increment(strategy: Strategy) {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);

    let start = Instant::now();
    let report = Harness::new(&store).run(&config(strategy)).unwrap();

    assert_eq!(report.status, RunStatus::Complete, "{report}");
    assert_eq!(report.check.initial, 0);
    assert_eq!(report.check.expected_delta, 200);
    assert_eq!(report.check.observed_delta, 200, "{report}");
    assert_eq!(report.check.difference, 0);
    assert_eq!(report.lost_updates(), 0);
    assert!(
        start.elapsed() < Duration::from_secs(120),
        "no livelock: finished in {:?}",
        start.elapsed()
    );
}

#[test]
fn test_five_workers_two_hundred_each_in_place() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let report = Harness::new(&store)
        .run(&BenchConfig::new(Strategy::InPlace, 5, 200).unwrap())
        .unwrap();

    assert_eq!(report.check.final_value, 1000);
    assert_eq!(report.committed, 1000);
    assert_eq!(report.conflict_terminations, 0);
    assert!(report.abort_cause.is_none());
}

#[test]
fn test_lost_update_can_reproduce() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let harness = Harness::new(&store);
    let run = BenchConfig::new(Strategy::LostUpdate, 8, 200).unwrap();

    let lost = (0..5).any(|_| {
        let report = harness.run(&run).unwrap();
        assert_eq!(report.committed, 1600, "every read-modify-write commits");
        assert!(report.check.observed_delta <= 1600);
        report.lost_updates() > 0
    });
    assert!(lost, "expected at least one run to lose updates");
}

#[test]
fn test_serializable_without_retry_never_loses_commits() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let report = Harness::new(&store)
        .run(&config(Strategy::Serializable))
        .unwrap();

    assert_ne!(report.status, RunStatus::Aborted, "{report}");
    assert_eq!(report.lost_updates(), 0, "{report}");
    assert_eq!(
        u64::try_from(report.check.observed_delta).unwrap(),
        report.committed
    );
    if report.status == RunStatus::Partial {
        assert!(report.conflict_terminations > 0);
        assert!(report.check.difference > 0);
    } else {
        assert_eq!(report.committed, 200);
    }
}

#[test]
fn test_every_strategy_starts_from_reset() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    for _ in 0..10 {
        store.increment().unwrap();
    }
    let harness = Harness::new(&store);

    for strategy in Strategy::ALL {
        let report = harness
            .run(&BenchConfig::new(strategy, 2, 5).unwrap())
            .unwrap();
        assert_eq!(report.check.initial, 0, "{strategy}");
        assert_eq!(report.strategy, strategy);
    }
}

#[test]
fn test_held_write_lock_fails_run_fast() {
    let dir = TempDir::new().unwrap();
    let timeout = Duration::from_millis(50);
    let store = SqliteCounter::new(dir.path().join("bench.db"), "user_counter", timeout).unwrap();
    let other = SqliteCounter::new(dir.path().join("bench.db"), "user_counter", timeout).unwrap();

    // Park a write transaction on a second connection for the whole run.
    let mut blocker = other.session().unwrap();
    blocker.read_for_update().unwrap();

    let start = Instant::now();
    let result = Harness::new(&store).run(&BenchConfig::new(Strategy::RowLock, 2, 5).unwrap());
    blocker.rollback().unwrap();

    assert!(start.elapsed() < Duration::from_secs(10));
    match result {
        Ok(report) => {
            assert_eq!(report.status, RunStatus::Aborted, "{report}");
            assert!(report.abort_cause.is_some());
        },
        Err(e) => assert!(e.is_unavailable(), "{e}"),
    }
}
