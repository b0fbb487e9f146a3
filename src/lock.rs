//! Single-writer advisory lock around ingestion runs.
//!
//! Acquisition never blocks: a held lock means another `memex sync` is in
//! progress and the caller skips its run. The returned [`LockGuard`] releases
//! on drop, so early returns, errors, and unwinding panics all let go of it.

use anyhow::{bail, Context, Result};
use std::fs::{File, OpenOptions, TryLockError};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::config::Config;

/// A non-blocking, process-exclusive lock.
pub trait AdvisoryLock: Send + Sync {
    /// `Ok(None)` when another process holds the lock.
    fn try_acquire(&self) -> Result<Option<LockGuard>>;

    fn path(&self) -> &Path;
}

/// Held lock; dropping it releases.
#[derive(Debug)]
pub struct LockGuard {
    held: Held,
}

#[derive(Debug)]
enum Held {
    /// Closing the descriptor drops the OS lock.
    Flock { file: File, path: PathBuf },
    /// The lock file itself is the lock.
    Lockfile(PathBuf),
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        match &self.held {
            Held::Flock { file, path } => {
                if let Err(e) = file.unlock() {
                    tracing::warn!(path = %path.display(), error = %e, "failed to release lock");
                }
            }
            Held::Lockfile(path) => {
                if let Err(e) = std::fs::remove_file(path) {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove lock file");
                }
            }
        }
    }
}

/// OS advisory lock (`flock` on Unix, `LockFileEx` on Windows).
///
/// The lock file is created if missing and left in place; only the lock on it
/// matters, and the OS drops it if the process dies.
pub struct FlockLock {
    path: PathBuf,
}

impl FlockLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AdvisoryLock for FlockLock {
    fn try_acquire(&self) -> Result<Option<LockGuard>> {
        ensure_parent(&self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open lock file: {}", self.path.display()))?;

        match file.try_lock() {
            Ok(()) => Ok(Some(LockGuard {
                held: Held::Flock {
                    file,
                    path: self.path.clone(),
                },
            })),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Error(e)) => Err(e)
                .with_context(|| format!("Failed to lock {}", self.path.display())),
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// Exclusive-create lock file for filesystems without advisory locks.
///
/// The file records the owner pid. A crashed owner leaves the file behind and
/// it must be removed by hand.
pub struct LockfileLock {
    path: PathBuf,
}

impl LockfileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AdvisoryLock for LockfileLock {
    fn try_acquire(&self) -> Result<Option<LockGuard>> {
        ensure_parent(&self.path)?;
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                Ok(Some(LockGuard {
                    held: Held::Lockfile(self.path.clone()),
                }))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to create lock file: {}", self.path.display())),
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Build the lock strategy named by `[lock] strategy`.
pub fn lock_for(config: &Config) -> Result<Box<dyn AdvisoryLock>> {
    let path = config.lock_path();
    match config.lock.strategy.as_str() {
        "flock" => Ok(Box::new(FlockLock::new(path))),
        "lockfile" => Ok(Box::new(LockfileLock::new(path))),
        other => bail!("Unknown lock strategy: '{}'", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_flock_is_exclusive_until_dropped() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sync.lock");
        let a = FlockLock::new(&path);
        let b = FlockLock::new(&path);

        let guard = a.try_acquire().unwrap();
        assert!(guard.is_some());
        assert!(b.try_acquire().unwrap().is_none());

        drop(guard);
        assert!(b.try_acquire().unwrap().is_some());
    }

    #[test]
    fn test_lockfile_is_exclusive_and_removed_on_drop() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("sync.lock");
        let lock = LockfileLock::new(&path);

        let guard = lock.try_acquire().unwrap();
        assert!(guard.is_some());
        assert!(path.exists());
        let pid = std::fs::read_to_string(&path).unwrap();
        assert_eq!(pid.trim(), std::process::id().to_string());
        assert!(lock.try_acquire().unwrap().is_none());

        drop(guard);
        assert!(!path.exists());
        assert!(lock.try_acquire().unwrap().is_some());
    }

    #[test]
    fn test_flock_released_on_panic() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sync.lock");
        let p = path.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = FlockLock::new(&p).try_acquire().unwrap();
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(FlockLock::new(&path).try_acquire().unwrap().is_some());
    }

    #[test]
    fn test_guard_released_on_panic() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sync.lock");
        let p = path.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = LockfileLock::new(&p).try_acquire().unwrap();
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(!path.exists());
    }
}
