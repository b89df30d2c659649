//! In-process stress run over any [`CounterStore`].

use super::checker::Snapshot;
use super::report::StressReport;
use crate::storage::CounterStore;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::Barrier;
use std::thread;
use std::time::Instant;

/// Runs `workers` threads, each calling `increment` `increments` times,
/// and compares the counter before and after.
///
/// A worker stops at its first error; the others carry on.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for zero workers or increments, and the
/// store's error if either checker read fails.
pub fn run_stress(
    store: &dyn CounterStore,
    workers: usize,
    increments: usize,
) -> Result<StressReport> {
    if workers == 0 || increments == 0 {
        return Err(Error::InvalidInput(
            "workers and increments must be positive".to_string(),
        ));
    }

    let snapshot = Snapshot::take(store)?;
    let barrier = Barrier::new(workers);
    let first_error: Mutex<Option<String>> = Mutex::new(None);

    let start = Instant::now();
    let errors: u64 = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let barrier = &barrier;
                let first_error = &first_error;
                scope.spawn(move || {
                    barrier.wait();
                    for _ in 0..increments {
                        if let Err(e) = store.increment() {
                            tracing::warn!(worker, error = %e, "Stress worker stopped");
                            first_error
                                .lock()
                                .get_or_insert_with(|| e.to_string());
                            return 1;
                        }
                    }
                    0
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or(1))
            .sum()
    });
    let duration = start.elapsed();

    let expected = (workers as u64).saturating_mul(increments as u64);
    let check = snapshot.finish(store, expected)?;

    tracing::info!(
        backend = store.backend_name(),
        workers,
        increments,
        observed = check.observed_delta,
        errors,
        "Stress run finished"
    );

    Ok(StressReport {
        backend: store.backend_name(),
        workers,
        increments_per_worker: increments,
        check,
        duration,
        errors,
        first_error: first_error.into_inner(),
    })
}
