//! Metrics recording shared by the storage backends.

use crate::Error;
use std::time::Instant;

/// Records count and latency for one storage operation.
///
/// Emits `tally_storage_operations_total` and
/// `tally_storage_operation_duration_ms`, labelled by backend, operation
/// and status (`success` or `error`).
pub fn record_operation_metrics(
    backend: &'static str,
    operation: &'static str,
    start: Instant,
    status: &'static str,
) {
    metrics::counter!(
        "tally_storage_operations_total",
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "tally_storage_operation_duration_ms",
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}

/// Counts a failed storage call by error kind.
pub fn record_storage_error(backend: &'static str, error: &Error) {
    metrics::counter!(
        "tally_storage_errors_total",
        "backend" => backend,
        "kind" => error.kind()
    )
    .increment(1);
}

/// Records the outcome of `result` and passes it through.
pub fn observe<T>(
    backend: &'static str,
    operation: &'static str,
    start: Instant,
    result: crate::Result<T>,
) -> crate::Result<T> {
    match &result {
        Ok(_) => record_operation_metrics(backend, operation, start, "success"),
        Err(e) => {
            record_operation_metrics(backend, operation, start, "error");
            record_storage_error(backend, e);
        },
    }
    result
}
