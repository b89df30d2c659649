//! Backend construction from validated configuration.
//!
//! ```text
//! BackendFactory
//!   ├── create()               → Box<dyn CounterStore>       (every kind)
//!   └── create_transactional() → Box<dyn TransactionalStore> (sqlite, postgres)
//!
//! Mongo and Cassandra counters are built by create() only.
//! ```
//!
//! Construction failures are fatal. The factory never falls back to a
//! different backend than the one configured.

use crate::config::BackendConfig;
use crate::storage::persistence::{
    CassandraCounter, FileCounter, InMemoryCounter, MongoCounter, PostgresCounter, RedisCounter,
    SqliteCounter,
};
use crate::storage::traits::{CounterStore, TransactionalStore};
use crate::{Error, Result};
use secrecy::ExposeSecret;

/// Factory for counter backends.
///
/// ```rust
/// use tally::{BackendConfig, BackendFactory};
///
/// let store = BackendFactory::create(&BackendConfig::Memory)?;
/// store.increment()?;
/// assert_eq!(store.read()?, 1);
/// # Ok::<(), tally::Error>(())
/// ```
pub struct BackendFactory;

impl BackendFactory {
    /// Creates the configured backend.
    ///
    /// # Errors
    ///
    /// Returns whatever the backend constructor returns:
    /// [`Error::StorageUnavailable`] if it cannot be reached,
    /// [`Error::StorageCorrupt`] for an unreadable counter file, or
    /// [`Error::FeatureNotEnabled`] for a kind compiled out of this build.
    pub fn create(config: &BackendConfig) -> Result<Box<dyn CounterStore>> {
        tracing::debug!(backend = config.kind(), "Creating counter backend");

        let store: Box<dyn CounterStore> = match config {
            BackendConfig::Memory => Box::new(InMemoryCounter::new()),
            BackendConfig::File {
                file_path,
                operation_timeout,
            } => Box::new(FileCounter::with_timeout(file_path, *operation_timeout)?),
            BackendConfig::Redis {
                url,
                table,
                operation_timeout,
            } => Box::new(RedisCounter::new(
                url.expose_secret(),
                redis_key(table),
                *operation_timeout,
            )?),
            BackendConfig::Mongo {
                url,
                database,
                table,
                pool_min,
                pool_max,
                operation_timeout,
            } => Box::new(MongoCounter::new(
                url.expose_secret(),
                database,
                table,
                *pool_min,
                *pool_max,
                *operation_timeout,
            )?),
            BackendConfig::Cassandra {
                host,
                port,
                keyspace,
                table,
                operation_timeout,
            } => Box::new(CassandraCounter::new(
                host,
                *port,
                keyspace,
                table,
                *operation_timeout,
            )?),
            BackendConfig::Sqlite {
                path,
                table,
                operation_timeout,
            } => Box::new(SqliteCounter::new(path, table, *operation_timeout)?),
            BackendConfig::Postgres {
                settings,
                table,
                operation_timeout,
            } => Box::new(PostgresCounter::new(settings, table, *operation_timeout)?),
        };
        Ok(store)
    }

    /// Creates a backend that supports benchmark sessions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for kinds without transactions
    /// (`memory`, `file`, `redis`, `mongo`, `cassandra`), otherwise the errors of
    /// [`BackendFactory::create`].
    pub fn create_transactional(config: &BackendConfig) -> Result<Box<dyn TransactionalStore>> {
        match config {
            BackendConfig::Sqlite {
                path,
                table,
                operation_timeout,
            } => Ok(Box::new(SqliteCounter::new(path, table, *operation_timeout)?)),
            BackendConfig::Postgres {
                settings,
                table,
                operation_timeout,
            } => Ok(Box::new(PostgresCounter::new(
                settings,
                table,
                *operation_timeout,
            )?)),
            other => {
                tracing::warn!(
                    backend = other.kind(),
                    "Backend has no transactions; benchmark needs sqlite or postgres"
                );
                Err(Error::Configuration(format!(
                    "storage type '{}' does not support transactions; use sqlite or postgres",
                    other.kind()
                )))
            },
        }
    }
}

/// Key holding the counter in Redis, `{prefix}:{user_id}`.
fn redis_key(prefix: &str) -> String {
    format!("{prefix}:{}", crate::storage::COUNTER_KEY)
}
