//! Embedded schema migrations for the PostgreSQL counter table.
//!
//! Migrations are compiled into the binary and applied in version order
//! when the backend starts. Applied versions are tracked in
//! `{table}_schema_migrations`.
//!
//! ```rust,ignore
//! use tally::storage::migrations::{Migration, MigrationRunner};
//!
//! const MIGRATIONS: &[Migration] = &[Migration {
//!     version: 1,
//!     description: "Counter table",
//!     sql: "CREATE TABLE IF NOT EXISTS {table} (user_id INTEGER PRIMARY KEY)",
//! }];
//!
//! MigrationRunner::new(pool, "user_counter").run(MIGRATIONS).await?;
//! ```

#[cfg(feature = "postgres")]
mod implementation {
    use crate::{Error, Result};
    use deadpool_postgres::{Object, Pool};

    /// A single migration with version and SQL.
    #[derive(Debug, Clone, Copy)]
    pub struct Migration {
        /// Migration version (sequential, starting at 1).
        pub version: i32,
        /// Human-readable description.
        pub description: &'static str,
        /// SQL to apply as one batch; `{table}` is replaced by the table
        /// name.
        pub sql: &'static str,
    }

    /// Applies migrations to one counter table.
    pub struct MigrationRunner {
        pool: Pool,
        table: String,
        history: String,
    }

    impl MigrationRunner {
        /// Creates a runner for `table`, tracking history in
        /// `{table}_schema_migrations`.
        #[must_use]
        pub fn new(pool: Pool, table: impl Into<String>) -> Self {
            let table = table.into();
            Self {
                pool,
                history: format!("{table}_schema_migrations"),
                table,
            }
        }

        /// Applies every migration newer than the recorded version.
        ///
        /// # Errors
        ///
        /// Returns [`Error::StorageUnavailable`] if a connection cannot be
        /// checked out, the history cannot be read, or a migration fails.
        pub async fn run(&self, migrations: &[Migration]) -> Result<()> {
            let mut client = self
                .pool
                .get()
                .await
                .map_err(|e| Error::unavailable("migration_get_connection", e))?;

            client
                .batch_execute(&format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        version INTEGER PRIMARY KEY,
                        description TEXT NOT NULL,
                        applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    )",
                    self.history
                ))
                .await
                .map_err(|e| Error::unavailable("create_migrations_table", e))?;

            let applied = self.applied_version(&client).await?;
            for migration in migrations.iter().filter(|m| m.version > applied) {
                self.apply(&mut client, migration).await?;
            }
            Ok(())
        }

        /// Highest recorded version, 0 for an empty history.
        ///
        /// An unreadable history is an error rather than version 0, so
        /// applied migrations are never replayed.
        async fn applied_version(&self, client: &Object) -> Result<i32> {
            let sql = format!("SELECT COALESCE(MAX(version), 0) FROM {}", self.history);
            client
                .query_one(&sql, &[])
                .await
                .and_then(|row| row.try_get(0))
                .map_err(|e| Error::unavailable("migration_current_version", e))
        }

        /// Runs one migration and records it in the same transaction.
        async fn apply(&self, client: &mut Object, migration: &Migration) -> Result<()> {
            let operation = format!("migration_v{}", migration.version);
            let tx = client
                .transaction()
                .await
                .map_err(|e| Error::unavailable(&operation, e))?;

            tx.batch_execute(&migration.sql.replace("{table}", &self.table))
                .await
                .map_err(|e| {
                    Error::unavailable(format!("{operation}: {}", migration.description), e)
                })?;
            tx.execute(
                &format!(
                    "INSERT INTO {} (version, description) VALUES ($1, $2)",
                    self.history
                ),
                &[&migration.version, &migration.description],
            )
            .await
            .map_err(|e| Error::unavailable("record_migration", e))?;
            tx.commit()
                .await
                .map_err(|e| Error::unavailable(&operation, e))?;

            tracing::info!(
                version = migration.version,
                description = migration.description,
                table = %self.table,
                "Applied migration"
            );
            Ok(())
        }
    }
}

#[cfg(feature = "postgres")]
pub use implementation::{Migration, MigrationRunner};

#[cfg(not(feature = "postgres"))]
mod stub {
    /// A single migration with version and SQL (stub).
    #[derive(Debug, Clone, Copy)]
    pub struct Migration {
        /// Migration version.
        pub version: i32,
        /// Human-readable description.
        pub description: &'static str,
        /// SQL to apply.
        pub sql: &'static str,
    }
}

#[cfg(not(feature = "postgres"))]
pub use stub::Migration;

/// Schema for the counter table, in application order.
pub const COUNTER_MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Counter table",
        sql: r"
            CREATE TABLE IF NOT EXISTS {table} (
                user_id INTEGER PRIMARY KEY,
                counter BIGINT NOT NULL DEFAULT 0
            )
        ",
    },
    Migration {
        version: 2,
        description: "Version column for optimistic writes",
        sql: r"
            ALTER TABLE {table} ADD COLUMN IF NOT EXISTS version BIGINT NOT NULL DEFAULT 0
        ",
    },
];
