//! Lock file implementation and related unit tests.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{StorageError, StorageResult};

/// Delay between attempts while another process holds the lock.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Lock file that prevents concurrent access from multiple processes.
#[derive(Debug)]
pub(super) struct LockFile {
    path: PathBuf,
    _file: File,
}

impl LockFile {
    /// Try to take the lock once.
    pub(super) fn new(path: PathBuf) -> StorageResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StorageError::WriteFailed(format!("Failed to create lock file: {}", e)))?;

        file.try_lock().map_err(|e| match e {
            std::fs::TryLockError::WouldBlock => StorageError::DirectoryLocked(format!(
                "Store '{}' is already in use by another process",
                path.parent().map(|p| p.display().to_string()).unwrap_or_default()
            )),
            std::fs::TryLockError::Error(io_err) => {
                StorageError::WriteFailed(format!("Failed to acquire lock: {}", io_err))
            }
        })?;

        if let Err(e) = file.set_len(0).and_then(|_| writeln!(file, "{}", std::process::id())) {
            tracing::warn!("Failed to write PID to lock file: {}", e);
        }

        Ok(Self {
            path,
            _file: file,
        })
    }

    /// Take the lock, retrying while it is held elsewhere until `timeout` elapses.
    pub(super) async fn acquire(path: PathBuf, timeout: Duration) -> StorageResult<Self> {
        let deadline = Instant::now() + timeout;

        loop {
            match Self::new(path.clone()) {
                Ok(lock) => return Ok(lock),
                Err(StorageError::DirectoryLocked(msg)) => {
                    if Instant::now() >= deadline {
                        tracing::warn!("{}", msg);
                        return Err(StorageError::LockTimeout(timeout));
                    }
                    tracing::debug!("Store lock busy, retrying: {}", msg);
                    tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!("Failed to remove lock file: {}", e);
        }
    }
}
