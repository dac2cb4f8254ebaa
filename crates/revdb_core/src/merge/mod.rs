//! Merge and rebase with rule-based conflict detection.
//!
//! A job locks both branches, diffs each side against the common base,
//! runs the conflict rules and either refuses with the full conflict list
//! or writes the result in one log batch. Nothing is written on refusal.

mod conflict;
mod engine;
mod rules;
mod three_way;

pub use conflict::{ConflictType, MergeConflict};
pub use engine::{MergeEngine, MergeJob, MergeOutcome, MergeRequest, MergeState};
pub(crate) use engine::MergeEnv;
pub use rules::{
    default_rules, ChangedInBothRule, ConflictRule, DeletedWhileChangedRule,
    DetachedReferenceRule, EntityMerge, InactiveReferenceRule, MergeContext,
};
pub use three_way::{merge_documents, Clash, ClashKind, ThreeWay};
