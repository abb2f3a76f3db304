//! Per-key locking.
//!
//! Two layers serialize installs of the same cache key:
//! - [`KeyedLocks`] hands out one async mutex per key inside a process
//! - [`FileLock`] is an exclusive lock file that cooperating processes
//!   sharing a cache root respect
//!
//! A lock file holds a random token. It is only removed by the holder whose
//! token it contains, and a lock older than [`FileLockOptions::stale_after`]
//! is treated as abandoned by a crashed process and broken.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::{CoreError, Result};

/// One async mutex per key, created on demand.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        KeyedLocks::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Take `key` only if nobody holds it.
    pub fn try_acquire(&self, key: &str) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.locks.lock();
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.try_lock_owned().ok()
    }
}

/// Tuning for [`FileLock::acquire`].
#[derive(Debug, Clone, Copy)]
pub struct FileLockOptions {
    /// Delay between attempts while another process holds the lock.
    pub poll_interval: Duration,
    /// Age after which an existing lock file is considered abandoned.
    pub stale_after: Duration,
}

impl Default for FileLockOptions {
    fn default() -> Self {
        FileLockOptions {
            poll_interval: Duration::from_millis(100),
            stale_after: Duration::from_secs(30 * 60),
        }
    }
}

/// An exclusive lock file, released on drop.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    token: String,
}

impl FileLock {
    /// Try once to create the lock file. `Ok(None)` means someone else holds
    /// it and it is not stale.
    pub fn try_acquire(path: &Path, options: &FileLockOptions) -> Result<Option<FileLock>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CoreError::io(parent, e))?;
        }
        let token = uuid::Uuid::new_v4().to_string();

        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                file.write_all(token.as_bytes())
                    .map_err(|e| CoreError::io(path, e))?;
                Ok(Some(FileLock {
                    path: path.to_path_buf(),
                    token,
                }))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if is_stale(path, options.stale_after) {
                    tracing::warn!(path = %path.display(), "breaking stale lock");
                    match fs::remove_file(path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(CoreError::io(path, e)),
                    }
                }
                Ok(None)
            }
            Err(e) => Err(CoreError::io(path, e)),
        }
    }

    /// Poll until the lock file can be created. Callers bound the wait with
    /// the execution deadline.
    pub async fn acquire(path: &Path, options: &FileLockOptions) -> Result<FileLock> {
        loop {
            if let Some(lock) = FileLock::try_acquire(path, options)? {
                return Ok(lock);
            }
            tokio::time::sleep(options.poll_interval).await;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Only remove the file if it still carries our token; a stale-lock
        // breaker may have replaced it.
        if let Ok(contents) = fs::read_to_string(&self.path) {
            if contents == self.token {
                let _ = fs::remove_file(&self.path);
            }
        }
    }
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > stale_after)
}
