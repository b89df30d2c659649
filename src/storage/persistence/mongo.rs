//! MongoDB-backed counter.
//!
//! The counter is one document `{user_id: 1, counter: n}`. Increments are a
//! single upserting `$inc`, which the server applies atomically, so no
//! client-side coordination is needed. Like Redis this is a plain
//! [`CounterStore`](crate::storage::CounterStore) without benchmark
//! sessions.

#[cfg(feature = "mongo")]
mod implementation {
    use crate::storage::COUNTER_KEY;
    use crate::storage::metrics::observe;
    use crate::storage::sql::validate_table_name;
    use crate::storage::traits::CounterStore;
    use crate::{Error, Result};
    use mongodb::bson::{Bson, Document, doc};
    use mongodb::options::ClientOptions;
    use mongodb::{Client, Collection};
    use std::future::Future;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};
    use tracing::instrument;

    /// Worker threads for the runtime that drives the driver.
    const RUNTIME_WORKERS: usize = 2;

    fn mongo_error(operation: &str, e: &mongodb::error::Error) -> Error {
        Error::unavailable(operation, e)
    }

    fn pool_size(n: usize) -> u32 {
        u32::try_from(n).unwrap_or(u32::MAX)
    }

    /// Driver handles; dropped inside the owning runtime.
    struct Driver {
        client: Client,
        collection: Collection<Document>,
    }

    /// Counter stored in one MongoDB document.
    ///
    /// Owns a runtime for the async driver, like
    /// [`PostgresCounter`](crate::storage::PostgresCounter). Its methods must
    /// not be called from inside another async runtime.
    pub struct MongoCounter {
        driver: Option<Driver>,
        runtime: Option<tokio::runtime::Runtime>,
        location: String,
        closed: AtomicBool,
    }

    impl MongoCounter {
        /// Connects to `connection_url` and verifies the server answers.
        ///
        /// # Errors
        ///
        /// Returns [`Error::Configuration`] for a malformed URL or invalid
        /// database and collection names, and [`Error::StorageUnavailable`]
        /// if the server cannot be reached.
        pub fn new(
            connection_url: &str,
            database: &str,
            collection: &str,
            pool_min: usize,
            pool_max: usize,
            operation_timeout: Duration,
        ) -> Result<Self> {
            let database = validate_table_name(database)?;
            let collection = validate_table_name(collection)?;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(RUNTIME_WORKERS)
                .thread_name("tally-mongo")
                .enable_all()
                .build()
                .map_err(|e| Error::unavailable("mongo_create_runtime", e))?;

            let client = runtime.block_on(async {
                let mut options = ClientOptions::parse(connection_url)
                    .await
                    .map_err(|e| Error::Configuration(format!("invalid mongo url: {e}")))?;
                options.app_name = Some("tally".to_string());
                options.min_pool_size = Some(pool_size(pool_min));
                options.max_pool_size = Some(pool_size(pool_max));
                options.connect_timeout = Some(operation_timeout);
                options.server_selection_timeout = Some(operation_timeout);
                Client::with_options(options).map_err(|e| mongo_error("mongo_connect", &e))
            })?;

            let counter = Self {
                driver: Some(Driver {
                    collection: client.database(database).collection(collection),
                    client,
                }),
                runtime: Some(runtime),
                location: format!("{database}.{collection}"),
                closed: AtomicBool::new(false),
            };

            let driver = counter.driver("mongo_ping")?;
            counter.block_on(async {
                driver
                    .client
                    .database(database)
                    .run_command(doc! { "ping": 1 })
                    .await
                    .map(|_| ())
                    .map_err(|e| mongo_error("mongo_ping", &e))
            })?;

            tracing::info!(
                collection = %counter.location,
                pool_min,
                pool_max,
                "MongoDB counter ready"
            );
            Ok(counter)
        }

        /// Returns `database.collection`.
        #[must_use]
        pub fn location(&self) -> &str {
            &self.location
        }

        /// Deletes the counter document, so the next read sees zero.
        ///
        /// # Errors
        ///
        /// Returns [`Error::StorageUnavailable`] if the server cannot be
        /// reached.
        pub fn reset(&self) -> Result<()> {
            let driver = self.driver("mongo_reset")?;
            self.block_on(async {
                driver
                    .collection
                    .delete_one(doc! { "user_id": COUNTER_KEY })
                    .await
                    .map(|_| ())
                    .map_err(|e| mongo_error("mongo_reset", &e))
            })
        }

        fn block_on<F, T>(&self, f: F) -> Result<T>
        where
            F: Future<Output = Result<T>>,
        {
            match &self.runtime {
                Some(rt) => rt.block_on(f),
                None => Err(Error::unavailable("mongo_block_on", "runtime shut down")),
            }
        }

        fn driver(&self, operation: &str) -> Result<&Driver> {
            match &self.driver {
                Some(driver) if !self.closed.load(Ordering::Acquire) => Ok(driver),
                _ => Err(Error::unavailable(operation, "mongo counter is closed")),
            }
        }

        fn decode(&self, found: Option<Document>) -> Result<u64> {
            let Some(document) = found else {
                return Ok(0);
            };
            let value = match document.get("counter") {
                None => return Ok(0),
                Some(Bson::Int32(n)) => i64::from(*n),
                Some(Bson::Int64(n)) => *n,
                Some(other) => {
                    return Err(Error::corrupt(
                        &self.location,
                        format!("counter field has type {:?}", other.element_type()),
                    ));
                },
            };
            u64::try_from(value).map_err(|_| {
                Error::corrupt(&self.location, format!("counter value {value} is negative"))
            })
        }
    }

    impl CounterStore for MongoCounter {
        #[instrument(skip(self), fields(backend = "mongo", collection = %self.location))]
        fn increment(&self) -> Result<()> {
            let driver = self.driver("mongo_increment")?;
            let start = Instant::now();
            let result = self.block_on(async {
                driver
                    .collection
                    .update_one(
                        doc! { "user_id": COUNTER_KEY },
                        doc! { "$inc": { "counter": 1_i64 } },
                    )
                    .upsert(true)
                    .await
                    .map(|_| ())
                    .map_err(|e| mongo_error("mongo_increment", &e))
            });
            observe("mongo", "increment", start, result)?;
            metrics::counter!("tally_increments_total", "backend" => "mongo").increment(1);
            Ok(())
        }

        #[instrument(skip(self), fields(backend = "mongo", collection = %self.location))]
        fn read(&self) -> Result<u64> {
            let driver = self.driver("mongo_read")?;
            let start = Instant::now();
            let result = self.block_on(async {
                driver
                    .collection
                    .find_one(doc! { "user_id": COUNTER_KEY })
                    .projection(doc! { "_id": 0, "counter": 1 })
                    .await
                    .map_err(|e| mongo_error("mongo_read", &e))
            });
            let found = observe("mongo", "read", start, result)?;
            let value = self.decode(found)?;
            metrics::counter!("tally_reads_total", "backend" => "mongo").increment(1);
            Ok(value)
        }

        fn close(&self) -> Result<()> {
            if let Some(driver) = &self.driver
                && !self.closed.swap(true, Ordering::AcqRel)
            {
                let client = driver.client.clone();
                self.block_on(async {
                    client.shutdown().await;
                    Ok(())
                })?;
                tracing::debug!(collection = %self.location, "MongoDB counter closed");
            }
            Ok(())
        }

        fn backend_name(&self) -> &'static str {
            "mongo"
        }
    }

    impl Drop for MongoCounter {
        fn drop(&mut self) {
            if let Some(rt) = self.runtime.take() {
                {
                    let _entered = rt.enter();
                    self.driver.take();
                }
                rt.shutdown_background();
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_invalid_names_rejected_before_connecting() {
            let result = MongoCounter::new(
                "mongodb://127.0.0.1:1",
                "counter_db",
                "user_counter; drop",
                1,
                10,
                Duration::from_millis(100),
            );
            assert!(matches!(result, Err(Error::Configuration(_))));
        }

        #[test]
        fn test_malformed_url_is_configuration_error() {
            let result = MongoCounter::new(
                "not-a-mongo-url",
                "counter_db",
                "user_counter",
                1,
                10,
                Duration::from_millis(100),
            );
            assert!(matches!(result, Err(Error::Configuration(_))));
        }

        #[test]
        fn test_pool_size_saturates() {
            assert_eq!(pool_size(100), 100);
            assert_eq!(pool_size(usize::MAX), u32::MAX);
        }
    }
}

#[cfg(feature = "mongo")]
pub use implementation::MongoCounter;

#[cfg(not(feature = "mongo"))]
mod stub {
    use crate::storage::traits::CounterStore;
    use crate::{Error, Result};
    use std::time::Duration;

    fn not_enabled() -> Error {
        Error::FeatureNotEnabled("mongo".to_string())
    }

    /// Stub MongoDB counter when the feature is not enabled.
    pub struct MongoCounter {
        _private: (),
    }

    impl MongoCounter {
        /// Always fails with [`Error::FeatureNotEnabled`].
        pub fn new(
            _connection_url: &str,
            _database: &str,
            _collection: &str,
            _pool_min: usize,
            _pool_max: usize,
            _operation_timeout: Duration,
        ) -> Result<Self> {
            Err(not_enabled())
        }

        /// Always fails with [`Error::FeatureNotEnabled`].
        pub fn reset(&self) -> Result<()> {
            Err(not_enabled())
        }
    }

    impl CounterStore for MongoCounter {
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
            "mongo"
        }
    }
}

#[cfg(not(feature = "mongo"))]
pub use stub::MongoCounter;

#[cfg(all(test, not(feature = "mongo")))]
mod tests {
    use super::*;

    #[test]
    fn test_stub_reports_missing_feature() {
        let result = MongoCounter::new(
            "mongodb://localhost",
            "counter_db",
            "user_counter",
            10,
            100,
            std::time::Duration::from_secs(1),
        );
        assert!(matches!(result, Err(crate::Error::FeatureNotEnabled(ref f)) if f == "mongo"));
    }
}
