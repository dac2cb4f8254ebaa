//! Per-branch exclusive locks.

use crate::branch::BranchPath;
use crate::error::{CoreError, CoreResult};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Serializes branch mutations by path.
///
/// Multi-path requests are sorted, deduplicated and granted all at once,
/// so two merges running in opposite directions can never deadlock and a
/// failed request never holds anything.
#[derive(Debug)]
pub struct LockManager {
    held: Mutex<BTreeSet<BranchPath>>,
    released: Condvar,
    timeout: Duration,
}

impl LockManager {
    /// Creates a manager that waits at most `timeout` per request.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            held: Mutex::new(BTreeSet::new()),
            released: Condvar::new(),
            timeout,
        }
    }

    /// Locks one path.
    ///
    /// # Errors
    ///
    /// [`CoreError::OperationLock`] on timeout.
    pub fn lock(&self, path: &BranchPath) -> CoreResult<BranchLockGuard<'_>> {
        self.lock_all(std::slice::from_ref(path))
    }

    /// Locks every path in `paths` or none of them.
    ///
    /// # Errors
    ///
    /// [`CoreError::OperationLock`] naming the first busy path once the
    /// timeout elapses.
    pub fn lock_all(&self, paths: &[BranchPath]) -> CoreResult<BranchLockGuard<'_>> {
        let mut wanted = paths.to_vec();
        wanted.sort();
        wanted.dedup();

        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut held = self.held.lock();
        loop {
            let Some(busy) = wanted.iter().find(|p| held.contains(*p)).cloned() else {
                held.extend(wanted.iter().cloned());
                debug!(paths = ?wanted, "acquired branch locks");
                return Ok(BranchLockGuard {
                    manager: self,
                    paths: wanted,
                });
            };
            if self.released.wait_until(&mut held, deadline).timed_out()
                && wanted.iter().any(|p| held.contains(p))
            {
                let waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                let path = busy.to_string();
                warn!(%path, waited_ms, "timed out waiting for branch lock");
                return Err(CoreError::OperationLock { path, waited_ms });
            }
        }
    }

    /// True while some guard holds `path`.
    #[must_use]
    pub fn is_locked(&self, path: &BranchPath) -> bool {
        self.held.lock().contains(path)
    }

    fn release(&self, paths: &[BranchPath]) {
        let mut held = self.held.lock();
        for path in paths {
            held.remove(path);
        }
        drop(held);
        self.released.notify_all();
    }
}

/// Holds branch locks until dropped.
#[derive(Debug)]
#[must_use = "locks are released when the guard is dropped"]
pub struct BranchLockGuard<'a> {
    manager: &'a LockManager,
    paths: Vec<BranchPath>,
}

impl BranchLockGuard<'_> {
    /// The locked paths in acquisition order.
    pub fn paths(&self) -> &[BranchPath] {
        &self.paths
    }
}

impl Drop for BranchLockGuard<'_> {
    fn drop(&mut self) {
        self.manager.release(&self.paths);
        debug!(paths = ?self.paths, "released branch locks");
    }
}
