//! Cassandra integration tests.
//!
//! These tests require a running Cassandra or ScyllaDB node. Set the
//! environment variable `TALLY_TEST_CASSANDRA_HOST` (and optionally
//! `TALLY_TEST_CASSANDRA_PORT`) to enable these tests:
//!
//! ```bash
//! export TALLY_TEST_CASSANDRA_HOST="127.0.0.1"
//! cargo test --features cassandra cassandra_integration
//! ```

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
#![cfg(feature = "cassandra")]

use std::env;
use std::time::Duration;
use tally::bench::run_stress;
use tally::config::DEFAULT_CASSANDRA_PORT;
use tally::storage::{CassandraCounter, CounterStore};
use uuid::Uuid;

/// Environment variable for the Cassandra contact point.
const CASSANDRA_HOST_ENV: &str = "TALLY_TEST_CASSANDRA_HOST";

/// Environment variable for the Cassandra port.
const CASSANDRA_PORT_ENV: &str = "TALLY_TEST_CASSANDRA_PORT";

/// Keyspace shared by every test; each test gets its own table.
const KEYSPACE: &str = "tally_test";

/// Returns the Cassandra contact point if available, or None to skip tests.
fn get_cassandra_node() -> Option<(String, u16)> {
    let host = env::var(CASSANDRA_HOST_ENV).ok()?;
    let port = env::var(CASSANDRA_PORT_ENV)
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_CASSANDRA_PORT);
    Some((host, port))
}

/// Macro to skip tests when Cassandra is not available.
macro_rules! require_cassandra {
    () => {
        match get_cassandra_node() {
            Some(node) => node,
            None => {
                eprintln!(
                    "Skipping test: {} not set. Set this environment variable to run Cassandra tests.",
                    CASSANDRA_HOST_ENV
                );
                return;
            },
        }
    };
}

fn open((host, port): &(String, u16)) -> CassandraCounter {
    let table = format!("test_counter_{}", Uuid::new_v4().simple());
    CassandraCounter::new(host, *port, KEYSPACE, &table, Duration::from_secs(10))
        .expect("Failed to connect to Cassandra")
}

#[test]
fn test_creates_schema_and_reads_zero() {
    let node = require_cassandra!();
    let counter = open(&node);
    assert!(counter.location().starts_with("tally_test.test_counter_"));
    assert_eq!(counter.read().unwrap(), 0);
}

#[test]
fn test_sequential_increments() {
    let node = require_cassandra!();
    let counter = open(&node);
    for _ in 0..10 {
        counter.increment().unwrap();
    }
    assert_eq!(counter.read().unwrap(), 10);
}

#[test]
fn test_concurrent_increments() {
    let node = require_cassandra!();
    let counter = open(&node);
    let report = run_stress(&counter, 8, 50).unwrap();
    assert_eq!(report.errors, 0, "{report}");
    assert!(report.check.matches(), "{report}");
}

#[test]
fn test_reset_truncates() {
    let node = require_cassandra!();
    let counter = open(&node);
    counter.increment().unwrap();
    counter.reset().unwrap();
    assert_eq!(counter.read().unwrap(), 0);
}

#[test]
fn test_reopen_keeps_schema() {
    let node = require_cassandra!();
    let table = format!("test_counter_{}", Uuid::new_v4().simple());
    let first = CassandraCounter::new(&node.0, node.1, KEYSPACE, &table, Duration::from_secs(10))
        .unwrap();
    first.increment().unwrap();
    first.close().unwrap();

    let second = CassandraCounter::new(&node.0, node.1, KEYSPACE, &table, Duration::from_secs(10))
        .unwrap();
    assert_eq!(second.read().unwrap(), 1);
}

#[test]
fn test_closed_counter_is_unavailable() {
    let node = require_cassandra!();
    let counter = open(&node);
    counter.close().unwrap();
    counter.close().unwrap();
    assert!(counter.increment().unwrap_err().is_unavailable());
}

#[test]
fn test_unreachable_node() {
    let result =
        CassandraCounter::new("127.0.0.1", 1, KEYSPACE, "user_counter", Duration::from_millis(200));
    assert!(result.err().unwrap().is_unavailable());
}
