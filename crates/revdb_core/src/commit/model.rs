//! Commit records.

use crate::branch::BranchPath;
use crate::revision::{EntityId, RevisionStamp};
use crate::types::{SegmentId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// How a component changed in a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Created.
    New,
    /// Modified.
    Changed,
    /// Removed.
    Removed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::New => "NEW",
            Self::Changed => "CHANGED",
            Self::Removed => "REMOVED",
        })
    }
}

/// Components changed under one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitChange {
    /// The container the components belong to.
    pub container_id: EntityId,
    /// Created components.
    pub new_components: Vec<EntityId>,
    /// Modified components.
    pub changed_components: Vec<EntityId>,
    /// Removed components.
    pub removed_components: Vec<EntityId>,
}

impl CommitChange {
    /// A change under `container` with no components yet.
    #[must_use]
    pub fn new(container_id: EntityId) -> Self {
        Self {
            container_id,
            new_components: Vec::new(),
            changed_components: Vec::new(),
            removed_components: Vec::new(),
        }
    }

    /// How `id` changed under this container.
    #[must_use]
    pub fn kind_of(&self, id: &EntityId) -> Option<ChangeKind> {
        if self.new_components.contains(id) {
            Some(ChangeKind::New)
        } else if self.changed_components.contains(id) {
            Some(ChangeKind::Changed)
        } else if self.removed_components.contains(id) {
            Some(ChangeKind::Removed)
        } else {
            None
        }
    }

    /// Every component id in this change.
    pub fn component_ids(&self) -> impl Iterator<Item = &EntityId> {
        self.new_components
            .iter()
            .chain(&self.changed_components)
            .chain(&self.removed_components)
    }

    fn push(&mut self, id: EntityId, kind: ChangeKind) {
        let list = match kind {
            ChangeKind::New => &mut self.new_components,
            ChangeKind::Changed => &mut self.changed_components,
            ChangeKind::Removed => &mut self.removed_components,
        };
        if !list.contains(&id) {
            list.push(id);
        }
    }
}

/// Accumulates [`CommitChange`]s in first-seen container order.
#[derive(Debug, Default)]
pub struct ChangeSetBuilder {
    changes: Vec<CommitChange>,
}

impl ChangeSetBuilder {
    /// Empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `component` under `container` changed as `kind`.
    pub fn record(&mut self, container: &EntityId, component: &EntityId, kind: ChangeKind) {
        let idx = match self.changes.iter().position(|c| &c.container_id == container) {
            Some(idx) => idx,
            None => {
                self.changes.push(CommitChange::new(container.clone()));
                self.changes.len() - 1
            }
        };
        self.changes[idx].push(component.clone(), kind);
    }

    /// True when nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// The recorded changes.
    #[must_use]
    pub fn build(self) -> Vec<CommitChange> {
        self.changes
    }
}

/// How a commit came out of a merge or rebase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeKind {
    /// The source view was folded into the target.
    Merge,
    /// The source changes were copied as one commit.
    Squash,
    /// The target was rebased onto its parent.
    Rebase,
}

/// Origin of a merge, squash or rebase commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSource {
    /// The branch changes came from.
    pub source: BranchPath,
    /// Kind of operation.
    pub kind: MergeKind,
}

/// An atomic, timestamped set of entity changes on one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Unique id.
    pub id: Uuid,
    /// Branch written to.
    pub branch: BranchPath,
    /// Segment written to.
    pub segment: SegmentId,
    /// Commit timestamp, unique in the repository.
    pub timestamp: Timestamp,
    /// Author.
    pub author: String,
    /// Message.
    pub comment: String,
    /// Changes grouped by container.
    pub changes: Vec<CommitChange>,
    /// Set for merge, squash and rebase commits.
    pub merge_source: Option<MergeSource>,
}

impl Commit {
    /// The stamp visibility is decided on.
    #[must_use]
    pub const fn stamp(&self) -> RevisionStamp {
        RevisionStamp::new(self.segment, self.timestamp)
    }

    /// The change recorded for a container.
    #[must_use]
    pub fn changes_by_container(&self, container: &EntityId) -> Option<&CommitChange> {
        self.changes.iter().find(|c| &c.container_id == container)
    }

    /// True if `id` appears as a container or a component.
    #[must_use]
    pub fn touches(&self, id: &EntityId) -> bool {
        self.changes
            .iter()
            .any(|c| &c.container_id == id || c.component_ids().any(|x| x == id))
    }

    /// How `id` changed in this commit, looking through every container.
    #[must_use]
    pub fn kind_of(&self, id: &EntityId) -> Option<ChangeKind> {
        self.changes.iter().find_map(|c| c.kind_of(id))
    }

    /// Every component id changed in this commit, containers included.
    #[must_use]
    pub fn touched_ids(&self) -> Vec<&EntityId> {
        let mut out: Vec<&EntityId> = Vec::new();
        for change in &self.changes {
            for id in std::iter::once(&change.container_id).chain(change.component_ids()) {
                if !out.contains(&id) {
                    out.push(id);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> EntityId {
        EntityId::new(s)
    }

    #[test]
    fn fresh_change_names_only_its_container() {
        let change = CommitChange::new(id("C1"));
        assert_eq!(change.container_id, id("C1"));
        assert_eq!(change.component_ids().count(), 0);
        assert_eq!(change.kind_of(&id("C1")), None);
    }

    #[test]
    fn builder_groups_by_container() {
        let mut builder = ChangeSetBuilder::new();
        builder.record(&id("C1"), &id("C1"), ChangeKind::New);
        builder.record(&id("C1"), &id("D1"), ChangeKind::New);
        builder.record(&id("C2"), &id("R1"), ChangeKind::Removed);
        builder.record(&id("C1"), &id("D1"), ChangeKind::New);
        let changes = builder.build();

        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].new_components, vec![id("C1"), id("D1")]);
        assert_eq!(changes[1].kind_of(&id("R1")), Some(ChangeKind::Removed));
    }

    #[test]
    fn commit_lookup() {
        let mut builder = ChangeSetBuilder::new();
        builder.record(&id("E1"), &id("E1"), ChangeKind::Changed);
        let commit = Commit {
            id: Uuid::new_v4(),
            branch: BranchPath::main(),
            segment: SegmentId::MAIN,
            timestamp: Timestamp::new(7),
            author: "tester".into(),
            comment: "change".into(),
            changes: builder.build(),
            merge_source: None,
        };
        assert!(commit.touches(&id("E1")));
        assert!(!commit.touches(&id("E2")));
        assert_eq!(commit.kind_of(&id("E1")), Some(ChangeKind::Changed));
        assert_eq!(
            commit.changes_by_container(&id("E1")).unwrap().changed_components,
            vec![id("E1")]
        );
        assert_eq!(commit.stamp().timestamp, Timestamp::new(7));
    }
}
