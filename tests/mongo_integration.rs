//! MongoDB integration tests.
//!
//! These tests require a running MongoDB server. Set the environment variable
//! `TALLY_TEST_MONGO_URL` to enable these tests:
//!
//! ```bash
//! export TALLY_TEST_MONGO_URL="mongodb://localhost:27017"
//! cargo test --features mongo mongo_integration
//! ```

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
#![cfg(feature = "mongo")]

use std::env;
use std::time::Duration;
use tally::bench::run_stress;
use tally::storage::{CounterStore, MongoCounter};
use uuid::Uuid;

/// Environment variable for MongoDB test connection URL.
const MONGO_URL_ENV: &str = "TALLY_TEST_MONGO_URL";

/// Returns the MongoDB connection URL if available, or None to skip tests.
fn get_mongo_url() -> Option<String> {
    env::var(MONGO_URL_ENV).ok()
}

/// Macro to skip tests when MongoDB is not available.
macro_rules! require_mongo {
    () => {
        match get_mongo_url() {
            Some(url) => url,
            None => {
                eprintln!(
                    "Skipping test: {} not set. Set this environment variable to run MongoDB tests.",
                    MONGO_URL_ENV
                );
                return;
            },
        }
    };
}

/// Opens a counter on a fresh collection and deletes its document on drop.
struct TestCounter(MongoCounter);

impl TestCounter {
    fn new(url: &str) -> Self {
        let collection = format!("tally_test_{}", Uuid::new_v4().simple());
        Self(
            MongoCounter::new(url, "tally_test", &collection, 1, 16, Duration::from_secs(5))
                .expect("Failed to connect to MongoDB"),
        )
    }
}

impl Drop for TestCounter {
    fn drop(&mut self) {
        let _ = self.0.reset();
    }
}

#[test]
fn test_missing_document_reads_zero() {
    let url = require_mongo!();
    let counter = TestCounter::new(&url);
    assert_eq!(counter.0.read().unwrap(), 0);
}

#[test]
fn test_first_increment_upserts() {
    let url = require_mongo!();
    let counter = TestCounter::new(&url);
    counter.0.increment().unwrap();
    assert_eq!(counter.0.read().unwrap(), 1);
    for _ in 0..9 {
        counter.0.increment().unwrap();
    }
    assert_eq!(counter.0.read().unwrap(), 10);
}

#[test]
fn test_concurrent_increments() {
    let url = require_mongo!();
    let counter = TestCounter::new(&url);
    let report = run_stress(&counter.0, 8, 100).unwrap();
    assert_eq!(report.errors, 0, "{report}");
    assert!(report.check.matches(), "{report}");
}

#[test]
fn test_reset_deletes_document() {
    let url = require_mongo!();
    let counter = TestCounter::new(&url);
    counter.0.increment().unwrap();
    counter.0.reset().unwrap();
    assert_eq!(counter.0.read().unwrap(), 0);
}

#[test]
fn test_closed_counter_is_unavailable() {
    let url = require_mongo!();
    let counter = TestCounter::new(&url);
    counter.0.close().unwrap();
    counter.0.close().unwrap();
    assert!(counter.0.increment().unwrap_err().is_unavailable());
    assert!(counter.0.read().unwrap_err().is_unavailable());
}

#[test]
fn test_unreachable_server() {
    let result = MongoCounter::new(
        "mongodb://127.0.0.1:1/?directConnection=true",
        "tally_test",
        "user_counter",
        0,
        1,
        Duration::from_millis(200),
    );
    assert!(result.err().unwrap().is_unavailable());
}
