//! Branch registry.

use crate::branch::allocator::{self, Rebased, SegmentAllocator};
use crate::branch::{BranchPath, BranchState, RevisionBranch};
use crate::error::{CoreError, CoreResult};
use crate::index::DocumentIndex;
use crate::types::SegmentId;
use std::sync::Arc;

/// Looks up branch values and plans new ones.
///
/// The manager never writes: every `plan_*` method returns the branch
/// values to persist, and the repository sends them through the log like
/// any other document. The current value of a branch is always re-read
/// from the index.
pub struct BranchManager {
    index: Arc<DocumentIndex>,
    allocator: SegmentAllocator,
}

impl BranchManager {
    /// Creates a manager whose allocator continues after the highest
    /// segment any stored branch references.
    pub fn new(index: Arc<DocumentIndex>) -> Self {
        let next = index
            .max_segment()
            .map_or(SegmentId::new(SegmentId::MAIN.as_u32() + 1), |s| {
                SegmentId::new(s.as_u32() + 1)
            });
        Self {
            index,
            allocator: SegmentAllocator::new(next),
        }
    }

    /// The segment allocator.
    pub fn allocator(&self) -> &SegmentAllocator {
        &self.allocator
    }

    /// The live branch at `path`.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if the path was never created or is deleted.
    pub fn get(&self, path: &BranchPath) -> CoreResult<RevisionBranch> {
        self.index
            .branch(path)
            .filter(RevisionBranch::is_live)
            .ok_or_else(|| CoreError::not_found("branch", path))
    }

    /// The stored value at `path`, deleted or not.
    pub fn get_any(&self, path: &BranchPath) -> Option<RevisionBranch> {
        self.index.branch(path)
    }

    /// Branches in path order.
    pub fn list(&self, include_deleted: bool) -> Vec<RevisionBranch> {
        self.index
            .branches()
            .into_iter()
            .filter(|b| include_deleted || b.is_live())
            .collect()
    }

    /// Live direct children of `path`.
    pub fn children(&self, path: &BranchPath) -> Vec<RevisionBranch> {
        self.list(false)
            .into_iter()
            .filter(|b| b.parent_path.as_ref() == Some(path))
            .collect()
    }

    /// Live branches anywhere below `path`.
    pub fn descendants(&self, path: &BranchPath) -> Vec<RevisionBranch> {
        self.list(false)
            .into_iter()
            .filter(|b| path.is_ancestor_of(&b.path))
            .collect()
    }

    /// The value of a new child `name` under `parent`.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] for a missing parent,
    /// [`CoreError::AlreadyExists`] if a live branch has the path, and the
    /// errors of [`allocator::create_child`].
    pub fn plan_create(&self, parent: &BranchPath, name: &str) -> CoreResult<RevisionBranch> {
        let parent = self.get(parent)?;
        let path = parent.path.child(name)?;
        if self.get(&path).is_ok() {
            return Err(CoreError::already_exists("branch", path));
        }
        let child = allocator::create_child(&parent, name, &self.allocator)?;
        debug_assert!(
            self.children(&parent.path).iter().all(|sibling| {
                sibling
                    .segments
                    .iter()
                    .all(|s| child.segments.iter().all(|c| c.id != s.id))
            }),
            "sibling segments overlap under {}",
            parent.path
        );
        Ok(child)
    }

    /// The deleted value of `path` and the stale values of its live
    /// descendants.
    ///
    /// # Errors
    ///
    /// [`CoreError::BadRequest`] for `MAIN`, [`CoreError::NotFound`] for a
    /// missing branch.
    pub fn plan_delete(
        &self,
        path: &BranchPath,
    ) -> CoreResult<(RevisionBranch, Vec<RevisionBranch>)> {
        if path.is_main() {
            return Err(CoreError::bad_request("MAIN cannot be deleted"));
        }
        let branch = self.get(path)?;
        let stale = self
            .descendants(path)
            .iter()
            .filter(|b| b.state == BranchState::Active)
            .map(allocator::mark_stale)
            .collect();
        Ok((allocator::delete(&branch), stale))
    }

    /// New values of `path` and its parent after a rebase, or `None` when
    /// the parent has not moved.
    ///
    /// # Errors
    ///
    /// [`CoreError::BadRequest`] for `MAIN` and the errors of
    /// [`allocator::rebase`].
    pub fn plan_rebase(&self, path: &BranchPath) -> CoreResult<Option<Rebased>> {
        let child = self.get(path)?;
        let parent_path = child
            .parent_path
            .clone()
            .ok_or_else(|| CoreError::bad_request("MAIN has no parent to rebase onto"))?;
        let parent = self.get(&parent_path)?;
        allocator::rebase(&child, &parent, &self.allocator)
    }
}

impl std::fmt::Debug for BranchManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchManager")
            .field("next_segment", &self.allocator.peek())
            .finish_non_exhaustive()
    }
}
