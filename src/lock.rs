//! Advisory single-instance lock: only one supervisor process may run
//! against a given lock file at a time.

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("failed to open lock file {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("another instance already holds the lock on {0:?}")]
    AlreadyLocked(PathBuf),
}

/// An acquired exclusive, non-blocking `flock(2)` lock.
///
/// The lock is released when this value is dropped (the kernel releases it
/// automatically when the owning file descriptor is closed).
#[derive(Debug)]
pub struct SingletonLock {
    path: PathBuf,
    file: File,
}

impl SingletonLock {
    /// Tries to acquire the lock at `path`, creating the file if needed.
    /// Returns [`LockError::AlreadyLocked`] if another process holds it.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(path)
            .map_err(|source| LockError::Open {
                path: path.to_owned(),
                source,
            })?;

        // SAFETY: `file.as_raw_fd()` is a valid, open file descriptor for
        // the lifetime of this call, and `flock` does not retain it beyond
        // the call.
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if result != 0 {
            return Err(LockError::AlreadyLocked(path.to_owned()));
        }

        Ok(Self {
            path: path.to_owned(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquisition_on_the_same_path_fails() {
        let dir = std::env::temp_dir().join(format!("usb-monitor-lock-test-{}", std::process::id()));
        let _first = SingletonLock::acquire(&dir).unwrap();
        let second = SingletonLock::acquire(&dir);
        assert!(matches!(second, Err(LockError::AlreadyLocked(_))));
        let _ = std::fs::remove_file(&dir);
    }
}
