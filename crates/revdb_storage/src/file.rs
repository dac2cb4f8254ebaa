//! File-backed byte store.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A byte store over one OS file.
///
/// `flush` hands buffered data to the OS, `sync` calls `sync_all`.
/// [`StorageBackend::replace`] writes a sibling `.tmp` file, syncs it and
/// renames it over the original.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    file: File,
    size: u64,
}

impl FileBackend {
    /// Opens or creates the file at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = Self::open_file(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner { file, size }),
        })
    }

    /// Opens the file, creating missing parent directories first.
    ///
    /// # Errors
    ///
    /// Fails if a directory or the file cannot be created.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_file(path: &Path) -> StorageResult<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?)
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut inner = self.inner.lock();
        let size = inner.size;
        if offset > size || offset.saturating_add(len as u64) > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        if len == 0 {
            return Ok(Vec::new());
        }
        inner.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        inner.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let inner = self.inner.get_mut();
        let offset = inner.size;
        if data.is_empty() {
            return Ok(offset);
        }
        inner.file.seek(SeekFrom::End(0))?;
        inner.file.write_all(data)?;
        inner.size += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.get_mut().file.flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.inner.lock().size)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.get_mut().file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let inner = self.inner.get_mut();
        if new_size > inner.size {
            return Err(StorageError::InvalidTruncate {
                requested: new_size,
                size: inner.size,
            });
        }
        inner.file.set_len(new_size)?;
        inner.file.sync_all()?;
        inner.size = new_size;
        Ok(())
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        let tmp = self.path.with_extension("tmp");
        {
            let mut staged = File::create(&tmp)?;
            staged.write_all(data)?;
            staged.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        let file = Self::open_file(&self.path)?;
        let inner = self.inner.get_mut();
        inner.size = file.metadata()?.len();
        inner.file = file;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        {
            let mut store = FileBackend::open(&path).unwrap();
            store.append(b"durable").unwrap();
            store.sync().unwrap();
        }
        let store = FileBackend::open(&path).unwrap();
        assert_eq!(store.size().unwrap(), 7);
        assert_eq!(store.read_all().unwrap(), b"durable");
    }

    #[test]
    fn create_dirs_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("store.dat");
        let store = FileBackend::open_with_create_dirs(&path).unwrap();
        assert_eq!(store.path(), path.as_path());
        assert!(path.exists());
    }

    #[test]
    fn truncate_drops_tail() {
        let dir = tempdir().unwrap();
        let mut store = FileBackend::open(&dir.path().join("t.bin")).unwrap();
        store.append(b"keep-drop").unwrap();
        store.truncate(4).unwrap();
        assert_eq!(store.read_all().unwrap(), b"keep");
        assert!(store.truncate(100).is_err());
    }

    #[test]
    fn replace_renames_over_original() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.dat");
        let mut store = FileBackend::open(&path).unwrap();
        store.append(b"a long history of records").unwrap();
        store.replace(b"compact").unwrap();
        assert_eq!(store.read_all().unwrap(), b"compact");
        assert!(!path.with_extension("tmp").exists());

        store.append(b"+").unwrap();
        drop(store);
        assert_eq!(fs::read(&path).unwrap(), b"compact+");
    }
}
