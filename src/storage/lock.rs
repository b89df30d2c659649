//! Bounded lock acquisition for the in-process backends.
//!
//! Backends guard their state with `parking_lot::Mutex`, which has a real
//! timed lock and no poisoning.

use crate::{Error, Result};
use parking_lot::{Mutex, MutexGuard};
use std::time::Duration;

/// Acquires a mutex, giving up after `timeout`.
///
/// # Errors
///
/// Returns [`Error::StorageUnavailable`] if the lock is still held when the
/// timeout elapses.
pub fn acquire_lock_with_timeout<'a, T>(
    mutex: &'a Mutex<T>,
    operation: &str,
    timeout: Duration,
) -> Result<MutexGuard<'a, T>> {
    mutex.try_lock_for(timeout).ok_or_else(|| {
        metrics::counter!("tally_mutex_timeout_total").increment(1);
        Error::unavailable(
            operation,
            format!("lock acquisition timed out after {timeout:?}"),
        )
    })
}
