//! Commits and entity history.

mod model;
mod tracker;

pub use model::{ChangeKind, ChangeSetBuilder, Commit, CommitChange, MergeKind, MergeSource};
pub use tracker::{history, ChangeSet};
pub(crate) use tracker::{check_expected_head, plan, CommitInfo, PlannedCommit};
