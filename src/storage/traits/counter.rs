//! Counter store traits.

use super::session::CounterSession;
use crate::Result;

/// Capability contract every counter backend implements.
///
/// Backends own their synchronization policy: a mutex for in-process
/// media, a connection pool for servers. Callers never lock around these
/// calls.
pub trait CounterStore: Send + Sync {
    /// Applies exactly one logical +1 to the counter.
    fn increment(&self) -> Result<()>;

    /// Returns the current value.
    fn read(&self) -> Result<u64>;

    /// Releases pools and handles.
    ///
    /// Idempotent: a second call is a no-op.
    fn close(&self) -> Result<()>;

    /// Short backend label used in logs and metrics.
    fn backend_name(&self) -> &'static str;
}

/// A counter store backed by a datastore with real transactions.
///
/// The benchmark harness drives one [`CounterSession`] per worker through
/// the primitives a strategy needs.
pub trait TransactionalStore: CounterStore {
    /// Opens a session owned by a single worker.
    ///
    /// Sessions are never shared between concurrent transactions.
    fn session(&self) -> Result<Box<dyn CounterSession + '_>>;

    /// Resets the counter and its version to zero.
    fn reset(&self) -> Result<()>;

    /// Sessions that can hold a transaction at the same time, when the
    /// store has a fixed bound such as a connection pool.
    fn max_concurrent_sessions(&self) -> Option<usize> {
        None
    }
}
