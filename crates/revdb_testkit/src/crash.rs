//! Crash recovery testing for RevDB.
//!
//! [`CrashableBackend`] wraps an in-memory store and starts failing once a
//! byte budget is used up, writing the part of the append that fits.
//! After the first failure every later mutation fails too, the way a dead
//! process writes nothing more. [`CrashHarness`] owns a repository over
//! two such backends and restarts it over the surviving bytes.
//!
//! ```rust
//! use revdb_testkit::prelude::*;
//!
//! let mut harness = CrashHarness::new();
//! put(harness.repo(), &BranchPath::main(), concept("E1", "heart"));
//! harness.wal().crash_after(10);
//! assert!(harness.repo().commit(
//!     &BranchPath::main(), "t", "c", ChangeSet::new().upsert(concept("E2", "lung")),
//! ).is_err());
//! harness.restart();
//! assert!(term(harness.repo(), &BranchPath::main(), "E2").is_none());
//! ```

use revdb_core::{Config, Repository};
use revdb_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct CrashState {
    budget: AtomicU64,
    crashed: AtomicBool,
    fail_sync: AtomicBool,
}

impl Default for CrashState {
    fn default() -> Self {
        Self {
            budget: AtomicU64::new(u64::MAX),
            crashed: AtomicBool::new(false),
            fail_sync: AtomicBool::new(false),
        }
    }
}

/// A storage backend wrapper that can simulate crashes.
///
/// Clones share both the bytes and the crash switch.
#[derive(Debug, Clone, Default)]
pub struct CrashableBackend {
    inner: InMemoryBackend,
    state: Arc<CrashState>,
}

impl CrashableBackend {
    /// Creates a new crashable backend over an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Crashes once `bytes` more bytes have been appended.
    pub fn crash_after(&self, bytes: u64) {
        self.state.budget.store(bytes, Ordering::SeqCst);
    }

    /// Sets whether sync and flush should fail.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.state.fail_sync.store(fail, Ordering::SeqCst);
    }

    /// Clears the crash state, as after a process restart.
    pub fn reset(&self) {
        self.state.budget.store(u64::MAX, Ordering::SeqCst);
        self.state.crashed.store(false, Ordering::SeqCst);
        self.state.fail_sync.store(false, Ordering::SeqCst);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }

    /// The bytes that reached the store.
    pub fn data(&self) -> Vec<u8> {
        self.inner.data()
    }

    fn crash(&self, what: &str) -> StorageError {
        self.state.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(io::Error::other(format!("simulated crash during {what}")))
    }

    fn check_alive(&self, what: &str) -> StorageResult<()> {
        if self.has_crashed() {
            return Err(self.crash(what));
        }
        Ok(())
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.check_alive("write")?;
        let budget = self.state.budget.load(Ordering::SeqCst);
        let len = data.len() as u64;
        if len > budget {
            let partial = usize::try_from(budget).unwrap_or(data.len());
            if partial > 0 {
                self.inner.append(&data[..partial])?;
            }
            self.state.budget.store(0, Ordering::SeqCst);
            return Err(self.crash("partial write"));
        }
        if budget != u64::MAX {
            self.state.budget.store(budget - len, Ordering::SeqCst);
        }
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.check_alive("flush")?;
        if self.state.fail_sync.load(Ordering::SeqCst) {
            return Err(self.crash("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.check_alive("sync")?;
        if self.state.fail_sync.load(Ordering::SeqCst) {
            return Err(self.crash("sync"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.check_alive("truncate")?;
        self.inner.truncate(new_size)
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        self.check_alive("replace")?;
        let budget = self.state.budget.load(Ordering::SeqCst);
        if data.len() as u64 > budget {
            return Err(self.crash("replace"));
        }
        self.inner.replace(data)
    }
}

/// Test harness for crash recovery scenarios.
pub struct CrashHarness {
    wal: CrashableBackend,
    store: CrashableBackend,
    config: Config,
    repo: Option<Repository>,
}

impl CrashHarness {
    /// Opens a fresh repository over crashable backends.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Opens a fresh repository with `config`.
    pub fn with_config(config: Config) -> Self {
        let mut harness = Self {
            wal: CrashableBackend::new(),
            store: CrashableBackend::new(),
            config,
            repo: None,
        };
        harness.restart();
        harness
    }

    /// The log backend.
    pub fn wal(&self) -> &CrashableBackend {
        &self.wal
    }

    /// The document store backend.
    pub fn store(&self) -> &CrashableBackend {
        &self.store
    }

    /// The running repository.
    pub fn repo(&self) -> &Repository {
        self.repo.as_ref().expect("repository is open")
    }

    /// Kills the repository, clears the crash switches and opens a new
    /// one over whatever bytes were written.
    pub fn restart(&mut self) -> &Repository {
        self.try_restart().expect("Failed to reopen repository")
    }

    /// Like [`Self::restart`], returning the open error instead of
    /// panicking.
    pub fn try_restart(&mut self) -> revdb_core::CoreResult<&Repository> {
        self.repo = None;
        self.wal.reset();
        self.store.reset();
        let repo = Repository::open_with_backends(
            self.config.clone(),
            Box::new(self.wal.clone()),
            Box::new(self.store.clone()),
        )?;
        Ok(self.repo.insert(repo))
    }
}

impl Default for CrashHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_write_keeps_the_prefix() {
        let mut backend = CrashableBackend::new();
        backend.append(b"hello").unwrap();
        backend.crash_after(3);
        assert!(backend.append(b"world").is_err());
        assert!(backend.has_crashed());
        assert_eq!(backend.data(), b"hellowor");
        assert!(backend.truncate(5).is_err());

        backend.reset();
        backend.truncate(5).unwrap();
        assert_eq!(backend.data(), b"hello");
    }

    #[test]
    fn failing_sync_crashes() {
        let mut backend = CrashableBackend::new();
        backend.set_fail_on_sync(true);
        assert!(backend.sync().is_err());
        assert!(backend.append(b"x").is_err());
    }
}
