//! Repository directory layout and process lock.
//!
//! ```text
//! <root>/
//! ├─ LOCK              # advisory lock, one process per repository
//! ├─ wal/wal.log       # write-ahead log
//! └─ index/store.dat   # document store with commit points
//! ```

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const WAL_DIR: &str = "wal";
const WAL_FILE: &str = "wal.log";
const INDEX_DIR: &str = "index";
const STORE_FILE: &str = "store.dat";

/// An opened repository directory.
///
/// Holds an exclusive `fs2` lock on `LOCK` for as long as it lives.
#[derive(Debug)]
pub struct RepositoryDir {
    path: PathBuf,
    _lock_file: File,
}

impl RepositoryDir {
    /// Opens or creates the directory and takes the process lock.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::RepositoryLocked`] when another process
    /// holds the lock, or [`CoreError::InvalidFormat`] when the directory
    /// is missing and `create_if_missing` is false.
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if !create_if_missing {
                return Err(CoreError::invalid_format(format!(
                    "repository directory does not exist: {}",
                    path.display()
                )));
            }
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "not a directory: {}",
                path.display()
            )));
        }

        fs::create_dir_all(path.join(WAL_DIR))?;
        fs::create_dir_all(path.join(INDEX_DIR))?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::RepositoryLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Whether `path` holds a repository layout, without locking it.
    #[must_use]
    pub fn is_repository(path: &Path) -> bool {
        path.join(LOCK_FILE).is_file()
            && path.join(WAL_DIR).is_dir()
            && path.join(INDEX_DIR).is_dir()
    }

    /// Root of the repository.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the write-ahead log.
    #[must_use]
    pub fn wal_path(&self) -> PathBuf {
        self.path.join(WAL_DIR).join(WAL_FILE)
    }

    /// Path of the document store.
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.path.join(INDEX_DIR).join(STORE_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_layout() {
        let tmp = tempdir().unwrap();
        let root = tmp.path().join("repo");
        let dir = RepositoryDir::open(&root, true).unwrap();
        assert!(root.join("LOCK").exists());
        assert!(dir.wal_path().parent().unwrap().is_dir());
        assert!(dir.store_path().parent().unwrap().is_dir());
    }

    #[test]
    fn recognises_layout_without_locking() {
        let tmp = tempdir().unwrap();
        let root = tmp.path().join("repo");
        assert!(!RepositoryDir::is_repository(&root));
        let _dir = RepositoryDir::open(&root, true).unwrap();
        assert!(RepositoryDir::is_repository(&root));
        fs::create_dir_all(tmp.path().join("plain")).unwrap();
        assert!(!RepositoryDir::is_repository(&tmp.path().join("plain")));
    }

    #[test]
    fn missing_dir_without_create_fails() {
        let tmp = tempdir().unwrap();
        let err = RepositoryDir::open(&tmp.path().join("absent"), false).unwrap_err();
        assert!(matches!(err, CoreError::InvalidFormat { .. }));
    }

    #[test]
    fn second_open_is_locked() {
        let tmp = tempdir().unwrap();
        let _first = RepositoryDir::open(tmp.path(), true).unwrap();
        let second = RepositoryDir::open(tmp.path(), true);
        assert!(matches!(second, Err(CoreError::RepositoryLocked)));
    }
}
