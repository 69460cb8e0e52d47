//! Store directory layout and locking.
//!
//! ```text
//! <store_path>/
//! ├─ LOCK               # Advisory lock, one process at a time
//! └─ transactions.log   # Append-only frame log
//! ```

use crate::error::{StoreError, StoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const LOG_FILE: &str = "transactions.log";

/// An opened store directory. Holds the exclusive lock until dropped.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens the directory at `path`, creating it if allowed, and locks it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Missing`] if the directory is absent and may not
    /// be created, [`StoreError::Locked`] if another process holds it, or an
    /// I/O error.
    pub fn open(path: &Path, create_if_missing: bool) -> StoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(StoreError::Missing {
                    path: path.display().to_string(),
                });
            }
        }
        if !path.is_dir() {
            return Err(StoreError::Missing {
                path: path.display().to_string(),
            });
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Root of the store.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the frame log.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.path.join(LOG_FILE)
    }
}
