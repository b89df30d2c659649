//! Backend contract tests.
//!
//! Every in-process backend must satisfy the same contract:
//! - a fresh counter reads 0
//! - N sequential increments read back as N
//! - `close` is idempotent
//!
//! Plus backend-specific behavior: file persistence across instances,
//! corruption reporting and config-driven construction.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::fs;
use std::time::Duration;
use tally::storage::{CounterStore, FileCounter, InMemoryCounter, SqliteCounter};
use tally::{BackendConfig, BackendFactory, Error, TallyConfig};
use tempfile::TempDir;
use test_case::test_case;

#[derive(Debug, Clone, Copy)]
enum Kind {
    Memory,
    File,
    Sqlite,
}

fn open(kind: Kind, dir: &TempDir) -> Box<dyn CounterStore> {
    match kind {
        Kind::Memory => Box::new(InMemoryCounter::new()),
        Kind::File => Box::new(FileCounter::new(dir.path().join("counter.txt")).unwrap()),
        Kind::Sqlite => Box::new(SqliteCounter::with_defaults(dir.path().join("counter.db")).unwrap()),
    }
}

#[test_case(Kind::Memory; "memory")]
#[test_case(Kind::File; "file")]
#[test_case(Kind::Sqlite; "sqlite")]
fn test_fresh_counter_reads_zero(kind: Kind) {
    let dir = TempDir::new().unwrap();
    let store = open(kind, &dir);
    assert_eq!(store.read().unwrap(), 0);
}

#[test_case(Kind::Memory; "memory")]
#[test_case(Kind::File; "file")]
#[test_case(Kind::Sqlite; "sqlite")]
fn test_sequential_increments(kind: Kind) {
    let dir = TempDir::new().unwrap();
    let store = open(kind, &dir);
    for _ in 0..25 {
        store.increment().unwrap();
    }
    assert_eq!(store.read().unwrap(), 25);
}

#[test_case(Kind::Memory; "memory")]
#[test_case(Kind::File; "file")]
#[test_case(Kind::Sqlite; "sqlite")]
fn test_close_twice(kind: Kind) {
    let dir = TempDir::new().unwrap();
    let store = open(kind, &dir);
    store.increment().unwrap();
    store.close().unwrap();
    store.close().unwrap();
}

#[test_case(Kind::File; "file")]
#[test_case(Kind::Sqlite; "sqlite")]
fn test_closed_store_is_unavailable(kind: Kind) {
    let dir = TempDir::new().unwrap();
    let store = open(kind, &dir);
    store.close().unwrap();
    assert!(store.increment().unwrap_err().is_unavailable());
    assert!(store.read().unwrap_err().is_unavailable());
}

#[test_case(Kind::File; "file")]
#[test_case(Kind::Sqlite; "sqlite")]
fn test_value_survives_reopen(kind: Kind) {
    let dir = TempDir::new().unwrap();
    {
        let store = open(kind, &dir);
        for _ in 0..7 {
            store.increment().unwrap();
        }
        store.close().unwrap();
    }
    let reopened = open(kind, &dir);
    assert_eq!(reopened.read().unwrap(), 7);
}

#[test]
fn test_file_layout_is_bare_decimal() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("counter.txt");
    let store = FileCounter::new(&path).unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "0");

    store.increment().unwrap();
    store.increment().unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "2");
}

#[test]
fn test_existing_file_is_not_reset() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("counter.txt");
    fs::write(&path, "41").unwrap();

    let store = FileCounter::new(&path).unwrap();
    store.increment().unwrap();
    assert_eq!(store.read().unwrap(), 42);
}

#[test_case("not a number"; "text")]
#[test_case("-3"; "negative")]
#[test_case(""; "empty")]
fn test_corrupt_file_is_reported_not_repaired(contents: &str) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("counter.txt");
    fs::write(&path, contents).unwrap();

    let store = FileCounter::new(&path).unwrap();
    assert!(matches!(store.read(), Err(Error::StorageCorrupt { .. })));
    assert!(matches!(store.increment(), Err(Error::StorageCorrupt { .. })));
    assert_eq!(fs::read_to_string(&path).unwrap(), contents);
}

#[test]
fn test_config_file_selects_backend() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("tally.yaml");
    let counter_path = dir.path().join("data").join("counter.txt");
    fs::write(
        &config_path,
        format!(
            "storage:\n  type: file\n  file_path: {}\n  operation_timeout_ms: 250\n",
            counter_path.display()
        ),
    )
    .unwrap();

    let config = TallyConfig::load_from_file(&config_path).unwrap();
    assert_eq!(config.source.as_deref(), Some(config_path.as_path()));
    assert!(matches!(
        config.storage,
        BackendConfig::File { operation_timeout, .. } if operation_timeout == Duration::from_millis(250)
    ));

    let store = BackendFactory::create(&config.storage).unwrap();
    store.increment().unwrap();
    assert_eq!(fs::read_to_string(&counter_path).unwrap(), "1");
}

#[test]
fn test_missing_required_key_is_fatal() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("tally.toml");
    fs::write(&config_path, "[storage]\ntype = \"sqlite\"\n").unwrap();

    let err = TallyConfig::load_from_file(&config_path).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
    assert!(err.to_string().contains("'path'"));
}

#[test]
fn test_unknown_backend_is_fatal() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("tally.toml");
    fs::write(&config_path, "[storage]\ntype = \"etcd\"\n").unwrap();
    assert!(TallyConfig::load_from_file(&config_path).is_err());
}
