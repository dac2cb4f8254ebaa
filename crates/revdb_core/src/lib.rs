//! # RevDB Core
//!
//! Revision-controlled document store engine.
//!
//! Every stored row is immutable. A branch sees a row when the row was
//! created in one of its segments before that segment's bound and no
//! revision stamp inside the branch's view supersedes it. On top of that
//! visibility rule the crate provides:
//!
//! - Branch and segment allocation with copy-free forking
//! - Snapshot searches rewritten to a branch filter
//! - Commits with per-container change records and entity history
//! - A write-ahead log with two-phase checkpoints and crash recovery
//! - Branch comparison by change category
//! - Merge, squash and rebase with pluggable conflict rules
//! - Purging of history no branch or snapshot can see
//!
//! ## Example
//!
//! ```rust
//! use revdb_core::{BranchPath, ChangeSet, Document, Repository};
//!
//! let repo = Repository::open_in_memory().unwrap();
//! let main = BranchPath::main();
//! repo.commit(&main, "editor", "seed", ChangeSet::new().upsert(
//!     Document::new("E1", "concept").with_field("term", "heart"),
//! )).unwrap();
//!
//! let draft = repo.create_branch(&main, "draft").unwrap();
//! repo.commit(&draft.path, "editor", "rename", ChangeSet::new().upsert(
//!     Document::new("E1", "concept").with_field("term", "cardiac"),
//! )).unwrap();
//!
//! let diff = repo.compare(&main, &draft.path, None).unwrap();
//! assert_eq!(diff.total(revdb_core::CompareCategory::Changed), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod branch;
pub mod codec;
pub mod commit;
pub mod compare;
mod config;
mod dir;
mod error;
pub mod index;
mod lock;
pub mod merge;
mod purge;
mod repository;
pub mod revision;
pub mod search;
mod types;
pub mod wal;

pub use branch::{BranchPath, BranchState, RevisionBranch, RevisionSegment, SegmentView, MAIN};
pub use commit::{ChangeKind, ChangeSet, Commit, CommitChange, MergeKind, MergeSource};
pub use compare::{CompareCategory, CompareDetail, RevisionCompareResult};
pub use config::Config;
pub use dir::RepositoryDir;
pub use error::{CoreError, CoreResult};
pub use index::{Expression, Hits, Mappings, Order, SortBy};
pub use lock::{BranchLockGuard, LockManager};
pub use merge::{ConflictRule, ConflictType, MergeConflict, MergeOutcome, MergeState};
pub use purge::{PurgeReport, PurgeStrategy};
pub use repository::{ReindexReport, Repository, RepositoryStats};
pub use revision::{DocType, Document, EntityId, FieldValue, Revision, RevisionStamp};
pub use search::{Query, RevisionSearcher};
pub use types::{Generation, SegmentId, Timestamp, TimestampClock};
