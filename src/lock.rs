//! Exclusive per-task lock.
//!
//! Serializes marker transitions that can race each other: queueing, the
//! supervisor launching or finalizing a run, and cancel. Backed by `flock` on
//! `<task>/.lock`; released when the guard is dropped.

use std::fs::{File, OpenOptions};
use std::path::Path;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

use crate::error::{EngineError, Result};

pub const LOCK_FILE: &str = ".lock";

#[derive(Debug)]
pub struct TaskLock {
    _file: File,
}

impl TaskLock {
    /// Block until the lock on `task_dir` is held.
    #[cfg(unix)]
    pub fn acquire(task_dir: &Path) -> Result<Self> {
        use std::os::unix::io::AsRawFd;

        let lock_path = task_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o644)
            .open(&lock_path)
            .map_err(|e| EngineError::io(&lock_path, e))?;

        let fd = file.as_raw_fd();
        let result = unsafe { libc::flock(fd, libc::LOCK_EX) };
        if result != 0 {
            return Err(EngineError::io(&lock_path, std::io::Error::last_os_error()));
        }

        Ok(Self { _file: file })
    }

    /// Non-Unix fallback - no actual locking
    #[cfg(not(unix))]
    pub fn acquire(task_dir: &Path) -> Result<Self> {
        let lock_path = task_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| EngineError::io(&lock_path, e))?;
        Ok(Self { _file: file })
    }
}
