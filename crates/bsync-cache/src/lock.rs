//! Cross-process cache lock for the exporter.
//!
//! A single exporter instance owns the cache during an export window; a
//! second invocation must fail fast with a retry-later signal rather than
//! queue behind the first.

use fs2::FileExt as _;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

pub const LOCK_FILE_NAME: &str = ".export.lock";

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another process holds the lock. Retry on the next scheduled run.
    #[error("lock at {0} is held by another process")]
    Held(PathBuf),

    #[error("failed to acquire lock at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// An exclusive advisory lock on the cache root, released on drop.
#[derive(Debug)]
pub struct CacheLock {
    file: File,
    path: PathBuf,
}

impl CacheLock {
    /// Acquires the exporter lock for `cache_root` without blocking.
    pub fn try_exclusive(cache_root: &Path) -> Result<Self, LockError> {
        let path = cache_root.join(LOCK_FILE_NAME);
        let io_err = |source| LockError::Io {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(cache_root).map_err(io_err)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(io_err)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file, path }),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(LockError::Held(path))
            }
            Err(e) => Err(io_err(e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
