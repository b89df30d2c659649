//! Shared `SQLite` infrastructure.
//!
//! - [`connection`]: opening and configuring connections (WAL, busy timeout)
//! - [`error`]: translating `rusqlite` failures into [`crate::Error`]
//!
//! Every [`SqliteCounter`](crate::storage::SqliteCounter) session owns its
//! own connection; WAL mode lets those readers proceed alongside the single
//! writer.

mod connection;
mod error;

pub use connection::{configure_connection, open_connection};
pub use error::map_sqlite_error;
