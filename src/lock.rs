//! File-based locking for single-writer safety of a commit log.
//!
//! Cross-platform (fs2) advisory lock on `<log>.lock`, held exclusively by the
//! process that appends to the log. Released on Drop.

use fs2::FileExt;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::consts::LOCK_SUFFIX;
use crate::error::Result;

pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // fs2 unlock errors on drop are ignored deliberately.
        let _ = self.file.unlock();
    }
}

/// `<log>.lock` next to the log file.
pub fn lock_path_for(log_path: &Path) -> PathBuf {
    let mut s: OsString = log_path.as_os_str().to_owned();
    s.push(".");
    s.push(LOCK_SUFFIX);
    PathBuf::from(s)
}

/// Take the exclusive lock of `log_path` without blocking.
/// Fails if another handle (in this or another process) holds it.
pub fn try_acquire_exclusive_lock(log_path: &Path) -> Result<LockGuard> {
    let path = lock_path_for(log_path);
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&path)?;
    file.try_lock_exclusive().map_err(|e| {
        io::Error::new(
            e.kind(),
            format!("commit log {} is locked: {e}", log_path.display()),
        )
    })?;
    Ok(LockGuard { file, path })
}
