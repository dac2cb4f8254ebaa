//! Branch tree and segment allocation.
//!
//! Branches are immutable values. Every operation that changes a branch
//! (fork, rebase, merge, delete) returns a new [`RevisionBranch`] which the
//! repository persists through the log; callers that need the current
//! state re-fetch by path.
//!
//! Visibility is computed from [`SegmentView`]s: a map from segment id to
//! the highest timestamp of that segment a snapshot may see.

mod allocator;
mod manager;
mod model;
mod view;

pub use allocator::{create_child, delete, fold, main_branch, mark_stale, rebase, Rebased, SegmentAllocator};
pub use manager::BranchManager;
pub use model::{BranchPath, BranchState, RevisionBranch, RevisionSegment, MAIN};
pub use view::SegmentView;
