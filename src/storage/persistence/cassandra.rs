//! Cassandra-backed counter.
//!
//! The counter lives in a CQL `counter` column. `counter = counter + 1` is
//! applied by the replicas without a read, so concurrent increments never
//! overwrite each other. Counter columns cannot be set to a value or take
//! part in lightweight transactions, so this is a plain
//! [`CounterStore`](crate::storage::CounterStore). Works against Cassandra
//! and ScyllaDB through the `scylla` driver.

#[cfg(feature = "cassandra")]
mod implementation {
    use crate::storage::COUNTER_KEY;
    use crate::storage::metrics::observe;
    use crate::storage::sql::validate_table_name;
    use crate::storage::traits::CounterStore;
    use crate::{Error, Result};
    use parking_lot::Mutex;
    use scylla::client::execution_profile::ExecutionProfile;
    use scylla::client::session::Session;
    use scylla::client::session_builder::SessionBuilder;
    use scylla::value::Counter;
    use std::future::Future;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tracing::instrument;

    /// Worker threads for the runtime that drives the driver.
    const RUNTIME_WORKERS: usize = 2;

    /// CQL text for one table, built once at construction.
    #[derive(Debug)]
    struct Queries {
        increment: String,
        read: String,
        reset: String,
    }

    impl Queries {
        fn new(table: &str) -> Self {
            Self {
                increment: format!("UPDATE {table} SET counter = counter + 1 WHERE user_id = ?"),
                read: format!("SELECT counter FROM {table} WHERE user_id = ?"),
                reset: format!("TRUNCATE {table}"),
            }
        }
    }

    /// Counter stored in one row of a Cassandra counter table.
    ///
    /// Owns a runtime for the async driver. Its methods must not be called
    /// from inside another async runtime.
    pub struct CassandraCounter {
        session: Mutex<Option<Arc<Session>>>,
        runtime: Option<tokio::runtime::Runtime>,
        location: String,
        queries: Queries,
    }

    impl CassandraCounter {
        /// Connects to `host:port`, then creates the keyspace and counter
        /// table when missing.
        ///
        /// # Errors
        ///
        /// Returns [`Error::Configuration`] for invalid keyspace or table
        /// names and [`Error::StorageUnavailable`] if the cluster cannot be
        /// reached or the schema cannot be created.
        pub fn new(
            host: &str,
            port: u16,
            keyspace: &str,
            table: &str,
            operation_timeout: Duration,
        ) -> Result<Self> {
            let keyspace = validate_table_name(keyspace)?;
            let table = validate_table_name(table)?;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(RUNTIME_WORKERS)
                .thread_name("tally-cassandra")
                .enable_all()
                .build()
                .map_err(|e| Error::unavailable("cassandra_create_runtime", e))?;

            let session = runtime.block_on(async {
                let profile = ExecutionProfile::builder()
                    .request_timeout(Some(operation_timeout))
                    .build();
                let session = SessionBuilder::new()
                    .known_node(format!("{host}:{port}"))
                    .connection_timeout(operation_timeout)
                    .default_execution_profile_handle(profile.into_handle())
                    .build()
                    .await
                    .map_err(|e| Error::unavailable("cassandra_connect", e))?;

                session
                    .query_unpaged(
                        format!(
                            "CREATE KEYSPACE IF NOT EXISTS {keyspace} WITH replication = \
                             {{'class': 'SimpleStrategy', 'replication_factor': 1}}"
                        ),
                        (),
                    )
                    .await
                    .map_err(|e| Error::unavailable("cassandra_create_keyspace", e))?;
                session
                    .use_keyspace(keyspace, false)
                    .await
                    .map_err(|e| Error::unavailable("cassandra_use_keyspace", e))?;
                session
                    .query_unpaged(
                        format!(
                            "CREATE TABLE IF NOT EXISTS {table} \
                             (user_id int PRIMARY KEY, counter counter)"
                        ),
                        (),
                    )
                    .await
                    .map_err(|e| Error::unavailable("cassandra_create_table", e))?;
                Ok::<_, Error>(session)
            })?;

            let counter = Self {
                session: Mutex::new(Some(Arc::new(session))),
                runtime: Some(runtime),
                location: format!("{keyspace}.{table}"),
                queries: Queries::new(table),
            };
            tracing::info!(table = %counter.location, "Cassandra counter ready");
            Ok(counter)
        }

        /// Returns `keyspace.table`.
        #[must_use]
        pub fn location(&self) -> &str {
            &self.location
        }

        /// Truncates the counter table, so the next read sees zero.
        ///
        /// Counter cells cannot be overwritten, and re-incrementing a deleted
        /// counter is unreliable, so this drops every row instead.
        ///
        /// # Errors
        ///
        /// Returns [`Error::StorageUnavailable`] if the cluster cannot be
        /// reached.
        pub fn reset(&self) -> Result<()> {
            let session = self.session("cassandra_reset")?;
            self.block_on(async {
                session
                    .query_unpaged(self.queries.reset.as_str(), ())
                    .await
                    .map(|_| ())
                    .map_err(|e| Error::unavailable("cassandra_reset", e))
            })
        }

        fn session(&self, operation: &str) -> Result<Arc<Session>> {
            self.session
                .lock()
                .clone()
                .ok_or_else(|| Error::unavailable(operation, "cassandra counter is closed"))
        }

        fn block_on<F, T>(&self, f: F) -> Result<T>
        where
            F: Future<Output = Result<T>>,
        {
            match &self.runtime {
                Some(rt) => rt.block_on(f),
                None => Err(Error::unavailable("cassandra_block_on", "runtime shut down")),
            }
        }

        async fn read_async(&self, session: &Session) -> Result<u64> {
            let rows = session
                .query_unpaged(self.queries.read.as_str(), (COUNTER_KEY,))
                .await
                .map_err(|e| Error::unavailable("cassandra_read", e))?
                .into_rows_result()
                .map_err(|e| Error::corrupt(&self.location, e))?;
            let row = rows
                .maybe_first_row::<(Counter,)>()
                .map_err(|e| Error::corrupt(&self.location, e))?;
            let value = row.map_or(0, |(Counter(n),)| n);
            u64::try_from(value).map_err(|_| {
                Error::corrupt(&self.location, format!("counter value {value} is negative"))
            })
        }
    }

    impl CounterStore for CassandraCounter {
        #[instrument(skip(self), fields(backend = "cassandra", table = %self.location))]
        fn increment(&self) -> Result<()> {
            let session = self.session("cassandra_increment")?;
            let start = Instant::now();
            let result = self.block_on(async {
                session
                    .query_unpaged(self.queries.increment.as_str(), (COUNTER_KEY,))
                    .await
                    .map(|_| ())
                    .map_err(|e| Error::unavailable("cassandra_increment", e))
            });
            observe("cassandra", "increment", start, result)?;
            metrics::counter!("tally_increments_total", "backend" => "cassandra").increment(1);
            Ok(())
        }

        #[instrument(skip(self), fields(backend = "cassandra", table = %self.location))]
        fn read(&self) -> Result<u64> {
            let session = self.session("cassandra_read")?;
            let start = Instant::now();
            let result = self.block_on(self.read_async(&session));
            let value = observe("cassandra", "read", start, result)?;
            metrics::counter!("tally_reads_total", "backend" => "cassandra").increment(1);
            Ok(value)
        }

        fn close(&self) -> Result<()> {
            let taken = self.session.lock().take();
            if let Some(session) = taken {
                let _entered = self.runtime.as_ref().map(tokio::runtime::Runtime::enter);
                drop(session);
                tracing::debug!(table = %self.location, "Cassandra counter closed");
            }
            Ok(())
        }

        fn backend_name(&self) -> &'static str {
            "cassandra"
        }
    }

    impl Drop for CassandraCounter {
        fn drop(&mut self) {
            if let Some(rt) = self.runtime.take() {
                {
                    let _entered = rt.enter();
                    self.session.get_mut().take();
                }
                rt.shutdown_background();
            }
        }
    }

}

#[cfg(feature = "cassandra")]
pub use implementation::CassandraCounter;

#[cfg(not(feature = "cassandra"))]
mod stub {
    use crate::storage::traits::CounterStore;
    use crate::{Error, Result};
    use std::time::Duration;

    fn not_enabled() -> Error {
        Error::FeatureNotEnabled("cassandra".to_string())
    }

    /// Stub Cassandra counter when the feature is not enabled.
    pub struct CassandraCounter {
        _private: (),
    }

    impl CassandraCounter {
        /// Always fails with [`Error::FeatureNotEnabled`].
        pub fn new(
            _host: &str,
            _port: u16,
            _keyspace: &str,
            _table: &str,
            _operation_timeout: Duration,
        ) -> Result<Self> {
            Err(not_enabled())
        }

        /// Always fails with [`Error::FeatureNotEnabled`].
        pub fn reset(&self) -> Result<()> {
            Err(not_enabled())
        }
    }

    impl CounterStore for CassandraCounter {
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
            "cassandra"
        }
    }
}

#[cfg(not(feature = "cassandra"))]
pub use stub::CassandraCounter;
