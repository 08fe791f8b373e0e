//! # Data Directory Lock
//!
//! One node per data directory: the snapshot file is not safe to share.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// Errors while preparing the data directory.
#[derive(Debug)]
pub enum LockError {
    Io(std::io::Error),
    /// Another process holds the lock.
    InUse(PathBuf),
    /// Less free space than configured.
    DiskFull { available: u64, required: u64 },
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockError::Io(e) => write!(f, "data directory error: {e}"),
            LockError::InUse(path) => {
                write!(f, "data directory {} is used by another node", path.display())
            }
            LockError::DiskFull {
                available,
                required,
            } => write!(
                f,
                "insufficient disk space: {available} bytes free, {required} required"
            ),
        }
    }
}

impl std::error::Error for LockError {}

impl From<std::io::Error> for LockError {
    fn from(e: std::io::Error) -> Self {
        LockError::Io(e)
    }
}

/// Exclusive lock on a data directory, released on drop.
#[derive(Debug)]
pub struct DataDirLock {
    file: File,
    path: PathBuf,
}

impl DataDirLock {
    /// Create `dir` if needed, check free space and take the lock.
    pub fn acquire(dir: &Path, min_free_bytes: u64) -> Result<Self, LockError> {
        fs::create_dir_all(dir)?;
        let available = fs2::available_space(dir)?;
        if available < min_free_bytes {
            return Err(LockError::DiskFull {
                available,
                required: min_free_bytes,
            });
        }

        let path = dir.join("LOCK");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        file.try_lock_exclusive()
            .map_err(|_| LockError::InUse(dir.to_path_buf()))?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DataDirLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_lock_fails() {
        let dir = tempfile::tempdir().unwrap();
        let lock = DataDirLock::acquire(dir.path(), 0).unwrap();
        assert!(lock.path().ends_with("LOCK"));
        assert!(matches!(
            DataDirLock::acquire(dir.path(), 0),
            Err(LockError::InUse(_))
        ));

        drop(lock);
        assert!(DataDirLock::acquire(dir.path(), 0).is_ok());
    }

    #[test]
    fn test_disk_space_requirement() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            DataDirLock::acquire(dir.path(), u64::MAX),
            Err(LockError::DiskFull { .. })
        ));
    }
}
