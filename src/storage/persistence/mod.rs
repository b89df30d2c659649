//! Counter backends.
//!
//! In-memory, file and `SQLite` backends are always built. PostgreSQL,
//! Redis, MongoDB and Cassandra need their Cargo features; without them the
//! types exist as stubs whose constructors return
//! [`crate::Error::FeatureNotEnabled`].

mod cassandra;
mod filesystem;
mod memory;
mod mongo;
mod postgresql;
mod redis;
mod sqlite;

pub use cassandra::CassandraCounter;
pub use filesystem::FileCounter;
pub use memory::InMemoryCounter;
pub use mongo::MongoCounter;
pub use postgresql::PostgresCounter;
pub use redis::RedisCounter;
pub use sqlite::SqliteCounter;
