//! Redis-backed counter.
//!
//! The counter is one string key holding a decimal integer. `INCR` is
//! atomic on the server, so no client-side coordination is needed. Redis
//! has no multi-statement transactions with rollback, so this backend is a
//! plain [`CounterStore`](crate::storage::CounterStore) and cannot run the
//! benchmark strategies.

#[cfg(feature = "redis")]
mod implementation {
    use crate::storage::metrics::observe;
    use crate::storage::traits::CounterStore;
    use crate::{Error, Result};
    use redis::{Client, Commands, Connection};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};
    use tracing::instrument;

    fn redis_error(operation: &str, e: &redis::RedisError) -> Error {
        if e.is_timeout() {
            return Error::unavailable(operation, format!("timed out: {e}"));
        }
        Error::unavailable(operation, e)
    }

    /// Counter stored under a single Redis key.
    pub struct RedisCounter {
        client: Client,
        key: String,
        operation_timeout: Duration,
        closed: AtomicBool,
    }

    impl RedisCounter {
        /// Connects to `connection_url` and verifies the server answers.
        ///
        /// # Errors
        ///
        /// Returns [`Error::Configuration`] for a malformed URL and
        /// [`Error::StorageUnavailable`] if the server cannot be reached.
        pub fn new(
            connection_url: &str,
            key: impl Into<String>,
            operation_timeout: Duration,
        ) -> Result<Self> {
            let client = Client::open(connection_url)
                .map_err(|e| Error::Configuration(format!("invalid redis url: {e}")))?;

            let counter = Self {
                client,
                key: key.into(),
                operation_timeout,
                closed: AtomicBool::new(false),
            };

            let mut conn = counter.get_connection("redis_connect")?;
            redis::cmd("PING")
                .query::<String>(&mut conn)
                .map_err(|e| redis_error("redis_ping", &e))?;

            tracing::info!(key = %counter.key, "Redis counter ready");
            Ok(counter)
        }

        /// Returns the key holding the counter.
        #[must_use]
        pub fn key(&self) -> &str {
            &self.key
        }

        /// Opens a connection for one command.
        fn get_connection(&self, operation: &str) -> Result<Connection> {
            if self.closed.load(Ordering::Acquire) {
                return Err(Error::unavailable(operation, "redis counter is closed"));
            }
            let conn = self
                .client
                .get_connection_with_timeout(self.operation_timeout)
                .map_err(|e| redis_error(operation, &e))?;
            conn.set_read_timeout(Some(self.operation_timeout))
                .map_err(|e| redis_error(operation, &e))?;
            conn.set_write_timeout(Some(self.operation_timeout))
                .map_err(|e| redis_error(operation, &e))?;
            Ok(conn)
        }

        /// Deletes the key, so the next read sees zero.
        ///
        /// # Errors
        ///
        /// Returns [`Error::StorageUnavailable`] if the server cannot be
        /// reached.
        pub fn reset(&self) -> Result<()> {
            let mut conn = self.get_connection("redis_reset")?;
            conn.del::<_, ()>(&self.key)
                .map_err(|e| redis_error("redis_reset", &e))
        }
    }

    impl CounterStore for RedisCounter {
        #[instrument(skip(self), fields(backend = "redis", key = %self.key))]
        fn increment(&self) -> Result<()> {
            let start = Instant::now();
            let result = self.get_connection("redis_increment").and_then(|mut conn| {
                conn.incr::<_, _, i64>(&self.key, 1)
                    .map(|_| ())
                    .map_err(|e| redis_error("redis_increment", &e))
            });
            observe("redis", "increment", start, result)?;
            metrics::counter!("tally_increments_total", "backend" => "redis").increment(1);
            Ok(())
        }

        #[instrument(skip(self), fields(backend = "redis", key = %self.key))]
        fn read(&self) -> Result<u64> {
            let start = Instant::now();
            let result = self.get_connection("redis_read").and_then(|mut conn| {
                let raw: Option<String> = conn
                    .get(&self.key)
                    .map_err(|e| redis_error("redis_read", &e))?;
                raw.map_or(Ok(0), |s| {
                    s.parse::<u64>()
                        .map_err(|e| Error::corrupt(format!("redis key {}", self.key), e))
                })
            });
            let value = observe("redis", "read", start, result)?;
            metrics::counter!("tally_reads_total", "backend" => "redis").increment(1);
            Ok(value)
        }

        fn close(&self) -> Result<()> {
            if !self.closed.swap(true, Ordering::AcqRel) {
                tracing::debug!(key = %self.key, "Redis counter closed");
            }
            Ok(())
        }

        fn backend_name(&self) -> &'static str {
            "redis"
        }
    }
}

#[cfg(feature = "redis")]
pub use implementation::RedisCounter;

#[cfg(not(feature = "redis"))]
mod stub {
    use crate::storage::traits::CounterStore;
    use crate::{Error, Result};
    use std::time::Duration;

    fn not_enabled() -> Error {
        Error::FeatureNotEnabled("redis".to_string())
    }

    /// Stub Redis counter when the feature is not enabled.
    pub struct RedisCounter {
        _private: (),
    }

    impl RedisCounter {
        /// Always fails with [`Error::FeatureNotEnabled`].
        pub fn new(
            _connection_url: &str,
            _key: impl Into<String>,
            _operation_timeout: Duration,
        ) -> Result<Self> {
            Err(not_enabled())
        }

        /// Always fails with [`Error::FeatureNotEnabled`].
        pub fn reset(&self) -> Result<()> {
            Err(not_enabled())
        }
    }

    impl CounterStore for RedisCounter {
        fn increment(&self) -> Result<()> {
            Err(not_enabled())
        }

        fn read(&self) -> Result<u64> {
            Err(not_enabled())
        }

        fn close(&self) -> Result<()> {
            Ok(())
        }

        fn backend_name(&self) -> &'static str {
            "redis"
        }
    }
}

#[cfg(not(feature = "redis"))]
pub use stub::RedisCounter;
