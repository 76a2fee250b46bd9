//! Installation lock.
//!
//! Snapshot, update and revert all perform multi-step filesystem mutations.
//! [`InstallLock`] holds an exclusive advisory lock on
//! `<root>/temp/lich-update.lock` for the duration of such a request, and a
//! second process is turned away with [`UpdateError::InstallBusy`] instead of
//! interleaving with the first.

use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::errors::UpdateError;

/// Exclusive lock on an installation, released on drop.
#[derive(Debug)]
pub struct InstallLock {
    file: File,
    path: PathBuf,
}

impl InstallLock {
    /// Acquires the lock without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InstallBusy`] if another process holds the
    /// lock, or an I/O error if the lock file cannot be opened.
    pub fn acquire(lock_path: &Path, root: &Path) -> Result<Self> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)
            .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;

        match file.try_lock() {
            Ok(()) => {
                debug!(path = %lock_path.display(), "installation lock acquired");
                Ok(Self {
                    file,
                    path: lock_path.to_path_buf(),
                })
            }
            Err(TryLockError::WouldBlock) => Err(UpdateError::install_busy(root).into()),
            Err(TryLockError::Error(e)) => Err(e)
                .with_context(|| format!("Failed to lock {}", lock_path.display())),
        }
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        debug!(path = %self.path.display(), "installation lock released");
    }
}
