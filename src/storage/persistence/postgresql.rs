//! PostgreSQL-backed transactional counter.
//!
//! Pooled connections via `deadpool-postgres`; the schema is managed by
//! [`COUNTER_MIGRATIONS`](crate::storage::migrations::COUNTER_MIGRATIONS).

#[cfg(feature = "postgres")]
mod implementation {
    use crate::config::PostgresSettings;
    use crate::storage::metrics::observe;
    use crate::storage::migrations::{COUNTER_MIGRATIONS, MigrationRunner};
    use crate::storage::sql::validate_table_name;
    use crate::storage::traits::{
        CounterRow, CounterSession, CounterStore, Isolation, TransactionalStore,
    };
    use crate::storage::COUNTER_KEY;
    use crate::{Error, Result};
    use deadpool_postgres::{
        Config, ManagerConfig, Object, Pool, PoolConfig, RecyclingMethod, Runtime, Timeouts,
    };
    use secrecy::ExposeSecret;
    use std::future::Future;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};
    use tokio_postgres::NoTls;
    use tokio_postgres::error::SqlState;
    use tracing::instrument;

    /// Worker threads for the runtime that drives the pool.
    const RUNTIME_WORKERS: usize = 2;

    /// SQL text for one table, built once at construction.
    #[derive(Debug)]
    struct Queries {
        seed: String,
        read: String,
        read_for_update: String,
        increment: String,
        write: String,
        write_if_version: String,
        reset: String,
    }

    impl Queries {
        fn new(table: &str) -> Self {
            Self {
                seed: format!(
                    "INSERT INTO {table} (user_id, counter, version) VALUES ($1, 0, 0)
                     ON CONFLICT (user_id) DO NOTHING"
                ),
                read: format!("SELECT counter, version FROM {table} WHERE user_id = $1"),
                read_for_update: format!(
                    "SELECT counter, version FROM {table} WHERE user_id = $1 FOR UPDATE"
                ),
                increment: format!(
                    "UPDATE {table} SET counter = counter + 1, version = version + 1
                     WHERE user_id = $1"
                ),
                write: format!(
                    "UPDATE {table} SET counter = $2, version = version + 1 WHERE user_id = $1"
                ),
                write_if_version: format!(
                    "UPDATE {table} SET counter = $2, version = version + 1
                     WHERE user_id = $1 AND version = $3"
                ),
                reset: format!(
                    "INSERT INTO {table} (user_id, counter, version) VALUES ($1, 0, 0)
                     ON CONFLICT (user_id) DO UPDATE SET counter = 0, version = 0"
                ),
            }
        }
    }

    /// Maps a driver error onto the crate's error taxonomy.
    ///
    /// Serialization failures and deadlocks are conflicts. Statement
    /// timeouts and lock timeouts are availability failures, as is anything
    /// that never reached the server.
    fn map_pg_error(operation: &str, err: &tokio_postgres::Error) -> Error {
        let cause = err
            .as_db_error()
            .map_or_else(|| err.to_string(), |db| db.message().to_string());

        match err.code() {
            Some(code)
                if *code == SqlState::T_R_SERIALIZATION_FAILURE
                    || *code == SqlState::T_R_DEADLOCK_DETECTED =>
            {
                Error::conflict(operation, cause)
            },
            Some(code)
                if *code == SqlState::QUERY_CANCELED || *code == SqlState::LOCK_NOT_AVAILABLE =>
            {
                Error::unavailable(operation, format!("timed out: {cause}"))
            },
            _ => Error::unavailable(operation, cause),
        }
    }

    fn pool_error(e: impl std::fmt::Display) -> Error {
        Error::unavailable("postgres_get_client", e)
    }

    /// Counter stored in one row of a PostgreSQL table.
    ///
    /// The store owns a small multi-threaded runtime that drives the pool,
    /// so its synchronous methods can be called from any plain thread. They
    /// must not be called from inside another async runtime.
    pub struct PostgresCounter {
        pool: Pool,
        runtime: Option<tokio::runtime::Runtime>,
        table: String,
        queries: Queries,
        closed: AtomicBool,
    }

    impl PostgresCounter {
        /// Connects using discrete connection settings.
        ///
        /// # Errors
        ///
        /// Returns [`Error::Configuration`] for an invalid table name and
        /// [`Error::StorageUnavailable`] if the pool cannot be created,
        /// migrated or warmed.
        pub fn new(
            settings: &PostgresSettings,
            table: &str,
            operation_timeout: Duration,
        ) -> Result<Self> {
            let mut cfg = Config::new();
            cfg.host = Some(settings.host.clone());
            cfg.port = Some(settings.port);
            cfg.dbname = Some(settings.dbname.clone());
            cfg.user = Some(settings.user.clone());
            cfg.password = Some(settings.password.expose_secret().to_string());

            Self::connect(cfg, table, settings.pool_min, settings.pool_max, operation_timeout)
        }

        /// Connects using a `postgresql://` URL.
        ///
        /// # Errors
        ///
        /// Returns [`Error::Configuration`] if the URL does not parse, plus
        /// everything [`PostgresCounter::new`] can return.
        pub fn from_url(
            url: &str,
            table: &str,
            pool_max: usize,
            operation_timeout: Duration,
        ) -> Result<Self> {
            let parsed = url
                .parse::<tokio_postgres::Config>()
                .map_err(|e| Error::Configuration(format!("invalid postgres url: {e}")))?;

            let mut cfg = Config::new();
            cfg.host = parsed.get_hosts().first().map(host_to_string);
            cfg.port = parsed.get_ports().first().copied();
            cfg.user = parsed.get_user().map(String::from);
            cfg.password = parsed
                .get_password()
                .map(|p| String::from_utf8_lossy(p).to_string());
            cfg.dbname = parsed.get_dbname().map(String::from);

            Self::connect(cfg, table, 0, pool_max, operation_timeout)
        }

        fn connect(
            mut cfg: Config,
            table: &str,
            pool_min: usize,
            pool_max: usize,
            operation_timeout: Duration,
        ) -> Result<Self> {
            let table = validate_table_name(table)?.to_string();

            cfg.connect_timeout = Some(operation_timeout);
            cfg.options = Some(format!(
                "-c statement_timeout={}",
                operation_timeout.as_millis()
            ));
            cfg.pool = Some(PoolConfig {
                max_size: pool_max,
                timeouts: Timeouts {
                    wait: Some(operation_timeout),
                    create: Some(operation_timeout),
                    recycle: Some(operation_timeout),
                },
                ..Default::default()
            });
            cfg.manager = Some(ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            });

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(RUNTIME_WORKERS)
                .thread_name("tally-postgres")
                .enable_all()
                .build()
                .map_err(|e| Error::unavailable("postgres_create_runtime", e))?;

            let pool = cfg
                .create_pool(Some(Runtime::Tokio1), NoTls)
                .map_err(|e| Error::unavailable("postgres_create_pool", e))?;

            let counter = Self {
                pool,
                runtime: Some(runtime),
                queries: Queries::new(&table),
                table,
                closed: AtomicBool::new(false),
            };
            counter.initialize(pool_min)?;

            tracing::info!(
                table = %counter.table,
                pool_min,
                pool_max,
                "PostgreSQL counter ready"
            );
            Ok(counter)
        }

        /// Runs migrations, seeds the counter row and opens `pool_min`
        /// connections ahead of the first request.
        fn initialize(&self, pool_min: usize) -> Result<()> {
            self.block_on(async {
                MigrationRunner::new(self.pool.clone(), &self.table)
                    .run(COUNTER_MIGRATIONS)
                    .await?;

                let client = self.pool.get().await.map_err(pool_error)?;
                client
                    .execute(&self.queries.seed, &[&COUNTER_KEY])
                    .await
                    .map_err(|e| map_pg_error("seed_counter_row", &e))?;
                drop(client);

                let mut warm = Vec::with_capacity(pool_min);
                for _ in 0..pool_min {
                    warm.push(self.pool.get().await.map_err(pool_error)?);
                }
                drop(warm);
                Ok(())
            })
        }

        /// Returns the counter table name.
        #[must_use]
        pub fn table(&self) -> &str {
            &self.table
        }

        fn block_on<F, T>(&self, f: F) -> Result<T>
        where
            F: Future<Output = Result<T>>,
        {
            match &self.runtime {
                Some(rt) => rt.block_on(f),
                None => Err(Error::unavailable("postgres_block_on", "runtime shut down")),
            }
        }

        fn ensure_open(&self, operation: &str) -> Result<()> {
            if self.closed.load(Ordering::Acquire) {
                return Err(Error::unavailable(operation, "postgres counter is closed"));
            }
            Ok(())
        }

        async fn read_async(&self) -> Result<CounterRow> {
            let client = self.pool.get().await.map_err(pool_error)?;
            query_row(&client, &self.queries.read, &self.table).await
        }

        async fn increment_async(&self) -> Result<()> {
            let client = self.pool.get().await.map_err(pool_error)?;
            let changed = client
                .execute(&self.queries.increment, &[&COUNTER_KEY])
                .await
                .map_err(|e| map_pg_error("increment", &e))?;
            if changed == 0 {
                return Err(missing_row(&self.table));
            }
            Ok(())
        }
    }

    #[cfg(unix)]
    fn host_to_string(h: &tokio_postgres::config::Host) -> String {
        match h {
            tokio_postgres::config::Host::Tcp(s) => s.clone(),
            tokio_postgres::config::Host::Unix(p) => p.to_string_lossy().to_string(),
        }
    }

    #[cfg(not(unix))]
    fn host_to_string(h: &tokio_postgres::config::Host) -> String {
        let tokio_postgres::config::Host::Tcp(s) = h;
        s.clone()
    }

    fn missing_row(table: &str) -> Error {
        Error::corrupt(table, format!("counter row user_id={COUNTER_KEY} missing"))
    }

    async fn query_row(client: &Object, sql: &str, table: &str) -> Result<CounterRow> {
        let row = client
            .query_opt(sql, &[&COUNTER_KEY])
            .await
            .map_err(|e| map_pg_error("read_counter", &e))?
            .ok_or_else(|| missing_row(table))?;

        let value = row
            .try_get(0)
            .map_err(|e| Error::corrupt(table, format!("counter column: {e}")))?;
        let version = row
            .try_get(1)
            .map_err(|e| Error::corrupt(table, format!("version column: {e}")))?;
        Ok(CounterRow { value, version })
    }

    impl CounterStore for PostgresCounter {
        #[instrument(skip(self), fields(backend = "postgres", table = %self.table))]
        fn increment(&self) -> Result<()> {
            self.ensure_open("increment")?;
            let start = Instant::now();
            let result = self.block_on(self.increment_async());
            observe("postgres", "increment", start, result)?;
            metrics::counter!("tally_increments_total", "backend" => "postgres").increment(1);
            Ok(())
        }

        #[instrument(skip(self), fields(backend = "postgres", table = %self.table))]
        fn read(&self) -> Result<u64> {
            self.ensure_open("read")?;
            let start = Instant::now();
            let row = observe("postgres", "read", start, self.block_on(self.read_async()))?;
            metrics::counter!("tally_reads_total", "backend" => "postgres").increment(1);
            u64::try_from(row.value).map_err(|_| {
                Error::corrupt(&self.table, format!("counter value {} is negative", row.value))
            })
        }

        fn close(&self) -> Result<()> {
            if !self.closed.swap(true, Ordering::AcqRel) {
                self.pool.close();
                tracing::debug!(table = %self.table, "PostgreSQL counter closed");
            }
            Ok(())
        }

        fn backend_name(&self) -> &'static str {
            "postgres"
        }
    }

    impl TransactionalStore for PostgresCounter {
        fn session(&self) -> Result<Box<dyn CounterSession + '_>> {
            self.ensure_open("open_session")?;
            Ok(Box::new(PostgresSession {
                store: self,
                client: None,
                in_transaction: false,
            }))
        }

        #[instrument(skip(self), fields(backend = "postgres", table = %self.table))]
        fn reset(&self) -> Result<()> {
            self.ensure_open("reset")?;
            self.block_on(async {
                let client = self.pool.get().await.map_err(pool_error)?;
                client
                    .execute(&self.queries.reset, &[&COUNTER_KEY])
                    .await
                    .map_err(|e| map_pg_error("reset", &e))?;
                Ok(())
            })
        }

        fn max_concurrent_sessions(&self) -> Option<usize> {
            Some(self.pool.status().max_size)
        }
    }

    impl Drop for PostgresCounter {
        fn drop(&mut self) {
            self.pool.close();
            if let Some(rt) = self.runtime.take() {
                rt.shutdown_background();
            }
        }
    }

    /// One worker's handle; holds a pooled connection only while a
    /// transaction is open or a statement is running.
    struct PostgresSession<'a> {
        store: &'a PostgresCounter,
        client: Option<Object>,
        in_transaction: bool,
    }

    impl PostgresSession<'_> {
        /// Checks out a connection if this session does not hold one.
        fn acquire(&mut self) -> Result<()> {
            if self.client.is_none() {
                let store = self.store;
                let client = store.block_on(async { store.pool.get().await.map_err(pool_error) })?;
                self.client = Some(client);
            }
            Ok(())
        }

        /// Returns the connection to the pool unless a transaction holds it.
        fn release_if_idle(&mut self) {
            if !self.in_transaction {
                self.client = None;
            }
        }

        fn batch(&mut self, operation: &'static str, sql: &'static str) -> Result<()> {
            self.acquire()?;
            match &self.client {
                Some(client) => self.store.block_on(async {
                    client
                        .batch_execute(sql)
                        .await
                        .map_err(|e| map_pg_error(operation, &e))
                }),
                None => Err(pool_error("no connection checked out")),
            }
        }

        fn execute(
            &mut self,
            operation: &'static str,
            sql: &str,
            params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
        ) -> Result<u64> {
            self.acquire()?;
            let result = match &self.client {
                Some(client) => self.store.block_on(async {
                    client
                        .execute(sql, params)
                        .await
                        .map_err(|e| map_pg_error(operation, &e))
                }),
                None => Err(pool_error("no connection checked out")),
            };
            self.release_if_idle();
            result
        }

        fn select(&mut self, sql: &str) -> Result<CounterRow> {
            self.acquire()?;
            let store = self.store;
            let result = match &self.client {
                Some(client) => store.block_on(query_row(client, sql, &store.table)),
                None => Err(pool_error("no connection checked out")),
            };
            self.release_if_idle();
            result
        }

        /// Ends the transaction with `sql`, then hands the connection back.
        fn finish(&mut self, operation: &'static str, sql: &'static str) -> Result<()> {
            if !self.in_transaction {
                self.client = None;
                return Ok(());
            }
            let result = self.batch(operation, sql);
            self.in_transaction = false;
            self.client = None;
            result
        }
    }

    impl CounterSession for PostgresSession<'_> {
        fn begin(&mut self, isolation: Isolation) -> Result<()> {
            if self.in_transaction {
                return Err(Error::InvalidInput(
                    "a transaction is already open on this session".to_string(),
                ));
            }
            let sql = match isolation {
                Isolation::ReadCommitted => "BEGIN ISOLATION LEVEL READ COMMITTED",
                Isolation::Serializable => "BEGIN ISOLATION LEVEL SERIALIZABLE",
            };
            if let Err(e) = self.batch("begin", sql) {
                self.client = None;
                return Err(e);
            }
            self.in_transaction = true;
            Ok(())
        }

        fn read(&mut self) -> Result<CounterRow> {
            let store = self.store;
            self.select(&store.queries.read)
        }

        fn read_for_update(&mut self) -> Result<CounterRow> {
            if !self.in_transaction {
                self.begin(Isolation::ReadCommitted)?;
            }
            let store = self.store;
            self.select(&store.queries.read_for_update)
        }

        fn write(&mut self, value: i64) -> Result<()> {
            let store = self.store;
            self.execute("write", &store.queries.write, &[&COUNTER_KEY, &value])
                .map(|_| ())
        }

        fn write_if_version(&mut self, value: i64, expected_version: i64) -> Result<bool> {
            let store = self.store;
            let changed = self.execute(
                "write_if_version",
                &store.queries.write_if_version,
                &[&COUNTER_KEY, &value, &expected_version],
            )?;
            Ok(changed == 1)
        }

        fn increment_in_place(&mut self) -> Result<()> {
            let store = self.store;
            self.execute("increment_in_place", &store.queries.increment, &[&COUNTER_KEY])
                .map(|_| ())
        }

        fn commit(&mut self) -> Result<()> {
            self.finish("commit", "COMMIT")
        }

        fn rollback(&mut self) -> Result<()> {
            self.finish("rollback", "ROLLBACK")
        }
    }

    impl Drop for PostgresSession<'_> {
        fn drop(&mut self) {
            if self.in_transaction {
                if let Err(e) = self.finish("rollback", "ROLLBACK") {
                    tracing::warn!(error = %e, "Failed to roll back abandoned PostgreSQL transaction");
                }
            }
        }
    }

}

#[cfg(feature = "postgres")]
pub use implementation::PostgresCounter;

#[cfg(not(feature = "postgres"))]
mod stub {
    use crate::config::PostgresSettings;
    use crate::storage::traits::{CounterSession, CounterStore, TransactionalStore};
    use crate::{Error, Result};
    use std::time::Duration;

    fn not_enabled() -> Error {
        Error::FeatureNotEnabled("postgres".to_string())
    }

    /// Stub PostgreSQL counter when the feature is not enabled.
    ///
    /// Every constructor fails, so no instance ever exists.
    pub struct PostgresCounter {
        _private: (),
    }

    impl PostgresCounter {
        /// Always fails with [`Error::FeatureNotEnabled`].
        pub fn new(
            _settings: &PostgresSettings,
            _table: &str,
            _operation_timeout: Duration,
        ) -> Result<Self> {
            Err(not_enabled())
        }

        /// Always fails with [`Error::FeatureNotEnabled`].
        pub fn from_url(
            _url: &str,
            _table: &str,
            _pool_max: usize,
            _operation_timeout: Duration,
        ) -> Result<Self> {
            Err(not_enabled())
        }
    }

    impl CounterStore for PostgresCounter {
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
            "postgres"
        }
    }

    impl TransactionalStore for PostgresCounter {
        fn session(&self) -> Result<Box<dyn CounterSession + '_>> {
            Err(not_enabled())
        }

        fn reset(&self) -> Result<()> {
            Err(not_enabled())
        }
    }
}

#[cfg(not(feature = "postgres"))]
pub use stub::PostgresCounter;

#[cfg(all(test, not(feature = "postgres")))]
mod tests {
    use super::*;

    #[test]
    fn test_stub_reports_missing_feature() {
        let result = PostgresCounter::from_url(
            "postgresql://localhost/x",
            "c",
            4,
            std::time::Duration::from_secs(1),
        );
        assert!(matches!(result, Err(crate::Error::FeatureNotEnabled(ref f)) if f == "postgres"));
    }
}
