//! Named advisory locks serializing imports of the same remote record.

use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use fs2::FileExt;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt::Debug;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// A provider of named, non-blocking, exclusive locks.
pub trait AdvisoryLocks: Send + Sync + Debug {
    /// Tries to take the lock called `name`. Returns `None` if it is held.
    fn try_acquire(&self, name: &str) -> SyncResult<Option<AdvisoryGuard>>;
}

/// Holds an advisory lock until dropped.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct AdvisoryGuard {
    name: String,
    inner: GuardInner,
}

#[derive(Debug)]
enum GuardInner {
    Memory(Arc<Mutex<HashSet<String>>>),
    File(File),
}

impl AdvisoryGuard {
    /// The lock name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for AdvisoryGuard {
    fn drop(&mut self) {
        match &self.inner {
            GuardInner::Memory(held) => {
                held.lock().remove(&self.name);
            }
            GuardInner::File(file) => {
                if let Err(e) = FileExt::unlock(file) {
                    tracing::warn!(lock = %self.name, error = %e, "failed to release advisory lock");
                }
            }
        }
    }
}

/// Advisory locks shared by the threads of one process.
#[derive(Debug, Default, Clone)]
pub struct MemoryAdvisoryLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl MemoryAdvisoryLocks {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `name` is currently held.
    pub fn is_held(&self, name: &str) -> bool {
        self.held.lock().contains(name)
    }
}

impl AdvisoryLocks for MemoryAdvisoryLocks {
    fn try_acquire(&self, name: &str) -> SyncResult<Option<AdvisoryGuard>> {
        if !self.held.lock().insert(name.to_string()) {
            return Ok(None);
        }
        Ok(Some(AdvisoryGuard {
            name: name.to_string(),
            inner: GuardInner::Memory(Arc::clone(&self.held)),
        }))
    }
}

/// Advisory locks shared by processes through lock files in a directory.
///
/// Each lock name maps to a file named after its SHA-256 digest.
#[derive(Debug, Clone)]
pub struct FileAdvisoryLocks {
    dir: PathBuf,
}

impl FileAdvisoryLocks {
    /// Uses `dir` for lock files, creating it if missing.
    pub fn open(dir: &Path) -> SyncResult<Self> {
        fs::create_dir_all(dir)
            .map_err(|e| SyncError::Config(format!("cannot create {}: {e}", dir.display())))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        let digest = Sha256::digest(name.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        self.dir.join(format!("{hex}.lock"))
    }
}

impl AdvisoryLocks for FileAdvisoryLocks {
    fn try_acquire(&self, name: &str) -> SyncResult<Option<AdvisoryGuard>> {
        let path = self.lock_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| SyncError::local(format!("cannot open {}: {e}", path.display())))?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => return Ok(None),
            Err(e) => {
                return Err(SyncError::local(format!(
                    "cannot lock {}: {e}",
                    path.display()
                )))
            }
        }
        Ok(Some(AdvisoryGuard {
            name: name.to_string(),
            inner: GuardInner::File(file),
        }))
    }
}

/// Takes a named lock, retrying in-process according to `retry`.
///
/// Once the attempts are exhausted the failure becomes
/// [`SyncError::Retryable`] with `exhausted_delay`.
pub fn acquire_or_retry(
    locks: &dyn AdvisoryLocks,
    name: &str,
    retry: &RetryConfig,
    exhausted_delay: Duration,
) -> SyncResult<AdvisoryGuard> {
    for attempt in 0..retry.max_attempts.max(1) {
        let delay = retry.delay_for_attempt(attempt);
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if let Some(guard) = locks.try_acquire(name)? {
            return Ok(guard);
        }
        tracing::debug!(lock = %name, attempt, "advisory lock busy");
    }

    tracing::warn!(lock = %name, "advisory lock still busy, will retry");
    Err(SyncError::retryable(
        format!("Could not acquire advisory lock {name}"),
        exhausted_delay,
    ))
}
