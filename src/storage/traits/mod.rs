//! Storage backend traits.

mod counter;
mod session;

pub use counter::{CounterStore, TransactionalStore};
pub use session::{CounterRow, CounterSession, Isolation};
