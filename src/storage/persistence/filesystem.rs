//! Single-file counter backend.
//!
//! The counter is persisted as the decimal text of its value, with no
//! delimiter and no trailing data.
//!
//! # Consistency
//!
//! A process-local mutex allows at most one read-modify-write in flight per
//! process. Nothing coordinates separate processes sharing the same file:
//! two processes incrementing concurrently can lose updates. The
//! transactional backends exist to measure exactly that class of anomaly.

use crate::storage::lock::acquire_lock_with_timeout;
use crate::storage::traits::CounterStore;
use crate::{Error, Result};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::instrument;

/// Upper bound on the counter file size.
///
/// A `u64` needs at most 20 digits; anything much larger is not ours.
const MAX_FILE_SIZE: u64 = 64;

/// Default time to wait for the process-local lock.
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Counter stored in a single text file.
#[derive(Debug)]
pub struct FileCounter {
    /// Path of the counter file.
    path: PathBuf,
    /// Serializes read-modify-write within this process.
    lock: Mutex<()>,
    /// How long an operation may wait for the lock.
    operation_timeout: Duration,
    /// Set once by [`CounterStore::close`].
    closed: AtomicBool,
}

impl FileCounter {
    /// Opens a file counter, creating the file holding `0` if it is missing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageUnavailable`] if the file or its parent
    /// directory cannot be created.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_timeout(path, DEFAULT_OPERATION_TIMEOUT)
    }

    /// Opens a file counter with an explicit lock timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageUnavailable`] if the file or its parent
    /// directory cannot be created.
    pub fn with_timeout(path: impl Into<PathBuf>, operation_timeout: Duration) -> Result<Self> {
        let path = path.into();
        Self::init_file(&path)?;

        tracing::info!(path = %path.display(), "File counter ready");

        Ok(Self {
            path,
            lock: Mutex::new(()),
            operation_timeout,
            closed: AtomicBool::new(false),
        })
    }

    /// Writes `0` to the file unless it already exists.
    ///
    /// `create_new` makes the existence check and the creation one step, so
    /// two processes starting together cannot both reset the value.
    fn init_file(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::unavailable("create_counter_dir", e))?;
        }

        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => file
                .write_all(b"0")
                .map_err(|e| Error::unavailable("init_counter_file", e)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(Error::unavailable("init_counter_file", e)),
        }
    }

    /// Returns the counter file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_open(&self, operation: &str) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::unavailable(operation, "file counter is closed"));
        }
        Ok(())
    }

    /// Reads and parses the file. Caller must hold the lock.
    fn load(&self) -> Result<u64> {
        let metadata =
            fs::metadata(&self.path).map_err(|e| Error::unavailable("read_counter_metadata", e))?;

        if metadata.len() > MAX_FILE_SIZE {
            return Err(Error::corrupt(
                self.path.display().to_string(),
                format!(
                    "file is {} bytes, larger than any counter value",
                    metadata.len()
                ),
            ));
        }

        let contents =
            fs::read_to_string(&self.path).map_err(|e| Error::unavailable("read_counter_file", e))?;

        parse_value(&contents).map_err(|cause| Error::corrupt(self.path.display().to_string(), cause))
    }

    /// Overwrites the file with `value`. Caller must hold the lock.
    fn store(&self, value: u64) -> Result<()> {
        fs::write(&self.path, value.to_string())
            .map_err(|e| Error::unavailable("write_counter_file", e))
    }
}

/// Parses the textual counter value.
///
/// Surrounding whitespace is tolerated so a hand-edited file still loads.
fn parse_value(contents: &str) -> std::result::Result<u64, String> {
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        return Err("file is empty".to_string());
    }
    trimmed
        .parse::<u64>()
        .map_err(|e| format!("{e}: {trimmed:?}"))
}

impl CounterStore for FileCounter {
    #[instrument(skip(self), fields(backend = "file", path = %self.path.display()))]
    fn increment(&self) -> Result<()> {
        self.ensure_open("file_increment")?;
        let _guard = acquire_lock_with_timeout(&self.lock, "file_increment", self.operation_timeout)?;

        let value = self.load()?;
        let next = value
            .checked_add(1)
            .ok_or_else(|| Error::corrupt(self.path.display().to_string(), "counter overflow"))?;
        self.store(next)?;

        metrics::counter!("tally_increments_total", "backend" => "file").increment(1);
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "file", path = %self.path.display()))]
    fn read(&self) -> Result<u64> {
        self.ensure_open("file_read")?;
        let _guard = acquire_lock_with_timeout(&self.lock, "file_read", self.operation_timeout)?;

        let value = self.load()?;
        metrics::counter!("tally_reads_total", "backend" => "file").increment(1);
        Ok(value)
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(path = %self.path.display(), "File counter closed");
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}
