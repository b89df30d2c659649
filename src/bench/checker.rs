//! Consistency checker.
//!
//! Reads the counter before workers start and after they have all joined,
//! then compares the observed delta with the expected one. It reports;
//! it does not judge.

use crate::Result;
use crate::storage::CounterStore;
use serde::Serialize;

/// The counter value captured before a run.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot {
    initial: u64,
}

impl Snapshot {
    /// Reads the starting value.
    ///
    /// # Errors
    ///
    /// Propagates the store's read error.
    pub fn take(store: &dyn CounterStore) -> Result<Self> {
        Ok(Self {
            initial: store.read()?,
        })
    }

    /// The value read before the run.
    #[must_use]
    pub const fn initial(&self) -> u64 {
        self.initial
    }

    /// Reads the final value and builds the comparison.
    ///
    /// Must be called after every worker has joined.
    ///
    /// # Errors
    ///
    /// Propagates the store's read error.
    pub fn finish(self, store: &dyn CounterStore, expected_delta: u64) -> Result<ConsistencyCheck> {
        Ok(ConsistencyCheck::new(self.initial, store.read()?, expected_delta))
    }
}

/// Expected versus observed counter movement over one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConsistencyCheck {
    /// Value before the run.
    pub initial: u64,
    /// Value after every worker joined.
    #[serde(rename = "final")]
    pub final_value: u64,
    /// `workers × transactions_per_worker`.
    pub expected_delta: u64,
    /// `final − initial`.
    pub observed_delta: i64,
    /// `expected − observed`.
    pub difference: i64,
}

impl ConsistencyCheck {
    /// Builds the comparison from raw readings.
    #[must_use]
    pub fn new(initial: u64, final_value: u64, expected_delta: u64) -> Self {
        let observed_delta = signed(i128::from(final_value) - i128::from(initial));
        let difference = signed(i128::from(expected_delta) - i128::from(observed_delta));
        Self {
            initial,
            final_value,
            expected_delta,
            observed_delta,
            difference,
        }
    }

    /// True when the counter moved by exactly the expected amount.
    #[must_use]
    pub fn matches(&self) -> bool {
        self.difference == 0
    }
}

fn signed(value: i128) -> i64 {
    i64::try_from(value).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryCounter;

    #[test]
    fn test_exact_match() {
        let check = ConsistencyCheck::new(5, 1005, 1000);
        assert_eq!(check.observed_delta, 1000);
        assert_eq!(check.difference, 0);
        assert!(check.matches());
    }

    #[test]
    fn test_lost_updates_show_as_positive_difference() {
        let check = ConsistencyCheck::new(0, 640, 1000);
        assert_eq!(check.observed_delta, 640);
        assert_eq!(check.difference, 360);
        assert!(!check.matches());
    }

    #[test]
    fn test_counter_moved_backwards() {
        let check = ConsistencyCheck::new(10, 3, 0);
        assert_eq!(check.observed_delta, -7);
        assert_eq!(check.difference, 7);
    }

    #[test]
    fn test_snapshot_reads_store() {
        let store = InMemoryCounter::new();
        store.increment().unwrap();
        let snapshot = Snapshot::take(&store).unwrap();
        assert_eq!(snapshot.initial(), 1);

        store.increment().unwrap();
        store.increment().unwrap();
        let check = snapshot.finish(&store, 2).unwrap();
        assert_eq!(check.final_value, 3);
        assert!(check.matches());
    }

    #[test]
    fn test_serialized_field_names() {
        let json = serde_json::to_value(ConsistencyCheck::new(0, 7, 10)).unwrap();
        assert_eq!(json["final"], 7);
        assert_eq!(json["observed_delta"], 7);
        assert_eq!(json["difference"], 3);
    }
}
