//! Benchmarks for counter increments.
//!
//! Measures one `increment` call per iteration on each in-process backend,
//! plus the cost of one benchmark transaction per strategy on `SQLite`.

// Criterion macros generate items without docs - this is expected for benchmarks
// Benchmarks use expect/unwrap for simplicity - panics are acceptable in benchmarks
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::time::Duration;
use tempfile::TempDir;

use tally::bench::{RetryPolicy, Strategy};
use tally::storage::{CounterStore, FileCounter, InMemoryCounter, SqliteCounter, TransactionalStore};

fn bench_increment(c: &mut Criterion) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let memory = InMemoryCounter::new();
    let file = FileCounter::new(temp_dir.path().join("counter.txt")).expect("Failed to open file");
    let sqlite =
        SqliteCounter::with_defaults(temp_dir.path().join("counter.db")).expect("Failed to open db");

    let mut group = c.benchmark_group("increment");
    group.measurement_time(Duration::from_secs(5));

    let stores: [(&str, &dyn CounterStore); 3] =
        [("memory", &memory), ("file", &file), ("sqlite", &sqlite)];
    for (name, store) in stores {
        group.bench_function(name, |b| b.iter(|| store.increment().unwrap()));
    }
    group.finish();
}

fn bench_read(c: &mut Criterion) {
    let memory = InMemoryCounter::new();
    c.bench_function("read/memory", |b| b.iter(|| black_box(memory.read().unwrap())));
}

fn bench_strategy_transaction(c: &mut Criterion) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let sqlite =
        SqliteCounter::with_defaults(temp_dir.path().join("bench.db")).expect("Failed to open db");
    let policy = RetryPolicy::default();

    let mut group = c.benchmark_group("strategy_transaction");
    group.measurement_time(Duration::from_secs(5));

    for strategy in Strategy::ALL {
        group.bench_with_input(BenchmarkId::from_parameter(strategy), &strategy, |b, &s| {
            let mut session = sqlite.session().unwrap();
            let mut retries = 0;
            b.iter(|| s.execute(session.as_mut(), &policy, &mut retries).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_increment, bench_read, bench_strategy_transaction);
criterion_main!(benches);
