//! In-memory counter backend.
//!
//! No persistence: the value lives and dies with the process.

use crate::Result;
use crate::storage::traits::CounterStore;
use parking_lot::Mutex;

/// Mutex-guarded in-process counter.
///
/// The lock is held only for the add itself, so concurrent increments are
/// serialized and none are lost.
#[derive(Debug, Default)]
pub struct InMemoryCounter {
    value: Mutex<u64>,
}

impl InMemoryCounter {
    /// Creates a counter starting at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: Mutex::new(0),
        }
    }
}

impl CounterStore for InMemoryCounter {
    fn increment(&self) -> Result<()> {
        *self.value.lock() += 1;
        metrics::counter!("tally_increments_total", "backend" => "memory").increment(1);
        Ok(())
    }

    fn read(&self) -> Result<u64> {
        let value = *self.value.lock();
        metrics::counter!("tally_reads_total", "backend" => "memory").increment(1);
        Ok(value)
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
