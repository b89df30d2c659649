//! Counter storage.
//!
//! Every backend implements [`CounterStore`]. Backends with real
//! transactions also implement [`TransactionalStore`], which hands each
//! benchmark worker a private [`CounterSession`].
//!
//! | Backend | Synchronization | Transactional |
//! |---|---|---|
//! | [`InMemoryCounter`] | process mutex | no |
//! | [`FileCounter`] | process mutex, none across processes | no |
//! | [`SqliteCounter`] | database locks, WAL | yes |
//! | [`PostgresCounter`] | row locks, MVCC | yes |
//! | [`RedisCounter`] | atomic `INCR` | no |
//! | [`MongoCounter`] | atomic upserting `$inc` | no |
//! | [`CassandraCounter`] | CQL counter column | no |

// Dropping a guard or connection a statement early buys nothing here.
#![allow(clippy::significant_drop_tightening)]

mod factory;
pub(crate) mod lock;
pub(crate) mod metrics;
pub mod migrations;
pub mod persistence;
mod sql;
pub mod sqlite;
pub mod traits;

pub use factory::BackendFactory;
pub use persistence::{
    CassandraCounter, FileCounter, InMemoryCounter, MongoCounter, PostgresCounter, RedisCounter,
    SqliteCounter,
};
pub use sql::validate_table_name;
pub use traits::{CounterRow, CounterSession, CounterStore, Isolation, TransactionalStore};

/// Key of the single counter row.
pub const COUNTER_KEY: i32 = 1;

/// Table holding the counter row unless configured otherwise.
pub const DEFAULT_TABLE: &str = "user_counter";
