//! `rusqlite` error translation.

use crate::Error;
use rusqlite::ErrorCode;

/// Maps a `rusqlite` error onto the crate's error taxonomy.
///
/// `SQLITE_BUSY`/`SQLITE_LOCKED` mean different things depending on where
/// they happen:
///
/// - inside an open transaction the busy handler is skipped, so the error
///   means a concurrent writer invalidated this transaction's snapshot
///   (`SQLITE_BUSY_SNAPSHOT` is reported under the same primary code):
///   [`Error::Conflict`]
/// - outside a transaction it means `busy_timeout` expired while waiting for
///   the write lock: [`Error::StorageUnavailable`]
///
/// Damaged database files map to [`Error::StorageCorrupt`]; everything
/// else is [`Error::StorageUnavailable`].
pub fn map_sqlite_error(operation: &str, err: &rusqlite::Error, in_transaction: bool) -> Error {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) if in_transaction => {
            Error::conflict(operation, err)
        },
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            Error::unavailable(operation, format!("timed out waiting for lock: {err}"))
        },
        Some(ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase) => {
            Error::corrupt(format!("sqlite database ({operation})"), err)
        },
        _ => Error::unavailable(operation, err),
    }
}
