//! Turning change sets into revision rows and commit records.

use crate::branch::{RevisionBranch, SegmentView};
use crate::commit::{ChangeKind, ChangeSetBuilder, Commit, MergeSource};
use crate::error::{CoreError, CoreResult};
use crate::index::{DocumentIndex, Mappings};
use crate::revision::{Document, EntityId, Revision, RevisionStamp};
use crate::types::Timestamp;
use crate::wal::{IndexDocument, RevisedMark, WalOperation};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use uuid::Uuid;

/// Documents to write and ids to remove in one commit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    upserts: Vec<Document>,
    removals: Vec<EntityId>,
    expected_head: Option<Timestamp>,
}

impl ChangeSet {
    /// An empty change set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a document to create or replace.
    #[must_use]
    pub fn upsert(mut self, document: Document) -> Self {
        self.upserts.push(document);
        self
    }

    /// Adds an entity to remove.
    #[must_use]
    pub fn remove(mut self, id: impl Into<EntityId>) -> Self {
        self.removals.push(id.into());
        self
    }

    /// Fails the commit if an entity in this set was changed on the
    /// branch after `head`.
    #[must_use]
    pub fn expect_head(mut self, head: Timestamp) -> Self {
        self.expected_head = Some(head);
        self
    }

    /// Documents to write.
    pub fn upserts(&self) -> &[Document] {
        &self.upserts
    }

    /// Ids to remove.
    pub fn removals(&self) -> &[EntityId] {
        &self.removals
    }

    /// The head the caller read from, if any.
    pub fn expected_head(&self) -> Option<Timestamp> {
        self.expected_head
    }

    /// Number of entities in the set.
    pub fn len(&self) -> usize {
        self.upserts.len() + self.removals.len()
    }

    /// True when the set changes nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ids(&self) -> impl Iterator<Item = &EntityId> {
        self.upserts.iter().map(|d| &d.id).chain(&self.removals)
    }

    fn validate(&self, mappings: &Mappings) -> CoreResult<()> {
        let mut seen = BTreeSet::new();
        for id in self.ids() {
            id.validate()?;
            if !seen.insert(id) {
                return Err(CoreError::bad_request(format!(
                    "{id} appears more than once in the change set"
                )));
            }
        }
        for doc in &self.upserts {
            doc.validate()?;
            if mappings.is_nested(&doc.doc_type) {
                return Err(CoreError::bad_request(format!(
                    "{} is a nested {} and must be written through its container",
                    doc.id, doc.doc_type
                )));
            }
        }
        Ok(())
    }
}

/// Who made a commit and why.
#[derive(Debug, Clone)]
pub(crate) struct CommitInfo {
    pub author: String,
    pub comment: String,
    pub merge_source: Option<MergeSource>,
}

/// Everything a commit writes, ready for the log.
#[derive(Debug, Clone)]
pub(crate) struct PlannedCommit {
    pub ops: Vec<WalOperation>,
    pub commit: Commit,
    pub branch: RevisionBranch,
}

/// Plans a commit of `changes` onto `branch` at `timestamp`.
///
/// Upserts are classified against `branch.view()`. An upsert whose
/// content equals the single visible row is dropped; if several rows are
/// visible, as after a merge fold, all of them are superseded. Returns
/// `None` when nothing changes.
pub(crate) fn plan(
    index: &DocumentIndex,
    mappings: &Mappings,
    branch: &RevisionBranch,
    timestamp: Timestamp,
    info: CommitInfo,
    changes: &ChangeSet,
) -> CoreResult<Option<PlannedCommit>> {
    branch.ensure_writable()?;
    changes.validate(mappings)?;
    if timestamp <= branch.head_timestamp {
        return Err(CoreError::conflict(format!(
            "timestamp {timestamp} is not after the head {} of {}",
            branch.head_timestamp, branch.path
        )));
    }

    let view = branch.view();
    let stamp = RevisionStamp::new(branch.segment_id, timestamp);
    let mut rows = Vec::new();
    let mut marks = Vec::new();
    let mut builder = ChangeSetBuilder::new();

    for doc in &changes.upserts {
        let visible = visible_rows(index, &doc.id, &view);
        if let [only] = visible.as_slice() {
            if only.document.same_content(doc) {
                continue;
            }
        }
        let previous = visible.iter().max_by_key(|r| r.created.timestamp);
        record_components(&mut builder, previous.map(|r| &r.document), Some(doc));
        marks.extend(visible.iter().map(|r| RevisedMark {
            key: r.key.clone(),
            stamp,
        }));
        rows.push(Revision::new(doc.clone(), stamp)?);
    }

    for id in &changes.removals {
        let visible = visible_rows(index, id, &view);
        let Some(previous) = visible.iter().max_by_key(|r| r.created.timestamp) else {
            return Err(CoreError::not_found("entity", format!("{id} on {}", branch.path)));
        };
        record_components(&mut builder, Some(&previous.document), None);
        marks.extend(visible.iter().map(|r| RevisedMark {
            key: r.key.clone(),
            stamp,
        }));
    }

    if builder.is_empty() {
        return Ok(None);
    }

    let commit = Commit {
        id: Uuid::new_v4(),
        branch: branch.path.clone(),
        segment: branch.segment_id,
        timestamp,
        author: info.author,
        comment: info.comment,
        changes: builder.build(),
        merge_source: info.merge_source,
    };
    let advanced = branch.with_head(timestamp);

    let mut ops: Vec<WalOperation> = rows
        .into_iter()
        .map(|row| WalOperation::Index(IndexDocument::Revision(row)))
        .collect();
    if !marks.is_empty() {
        ops.push(WalOperation::BulkUpdate(marks));
    }
    ops.push(WalOperation::Index(IndexDocument::Commit(commit.clone())));
    ops.push(WalOperation::Index(IndexDocument::Branch(advanced.clone())));

    debug!(
        branch = %branch.path,
        %timestamp,
        containers = commit.changes.len(),
        ops = ops.len(),
        "planned commit"
    );
    Ok(Some(PlannedCommit {
        ops,
        commit,
        branch: advanced,
    }))
}

/// Fails if a commit after the change set's expected head touched any of
/// its entities.
pub(crate) fn check_expected_head(
    index: &DocumentIndex,
    branch: &RevisionBranch,
    changes: &ChangeSet,
) -> CoreResult<()> {
    let Some(expected) = changes.expected_head else {
        return Ok(());
    };
    if branch.head_timestamp <= expected {
        return Ok(());
    }
    let view = branch.view();
    let racing = index.scan_commits(|c| c.timestamp > expected && view.contains(c.stamp()));
    for commit in racing {
        if let Some(id) = changes.ids().find(|id| commit.touches(id)) {
            return Err(CoreError::conflict(format!(
                "{id} was changed on {} at {} after {expected}",
                branch.path, commit.timestamp
            )));
        }
    }
    debug!(branch = %branch.path, %expected, head = %branch.head_timestamp, "head moved without overlap");
    Ok(())
}

/// Commits visible in `view` that touch `id`, newest first.
#[must_use]
pub fn history(index: &DocumentIndex, view: &SegmentView, id: &EntityId) -> Vec<Commit> {
    let mut commits = index.commits_visible(view);
    commits.retain(|c| c.touches(id));
    commits.reverse();
    commits
}

fn visible_rows(index: &DocumentIndex, id: &EntityId, view: &SegmentView) -> Vec<Revision> {
    index
        .rows(id)
        .into_iter()
        .filter(|r| view.is_visible(r))
        .collect()
}

fn same_own_content(a: &Document, b: &Document) -> bool {
    a.doc_type == b.doc_type && a.container_id == b.container_id && a.fields == b.fields
}

fn flatten<'a>(doc: &'a Document, out: &mut BTreeMap<&'a EntityId, &'a Document>) {
    for child in &doc.nested {
        out.insert(&child.id, child);
        flatten(child, out);
    }
}

fn record_components(builder: &mut ChangeSetBuilder, old: Option<&Document>, new: Option<&Document>) {
    let Some(container) = new.or(old).map(|d| d.container_key().clone()) else {
        return;
    };
    match (old, new) {
        (None, Some(doc)) => builder.record(&container, &doc.id, ChangeKind::New),
        (Some(doc), None) => builder.record(&container, &doc.id, ChangeKind::Removed),
        (Some(before), Some(after)) if !same_own_content(before, after) => {
            builder.record(&container, &after.id, ChangeKind::Changed);
        }
        _ => {}
    }

    let mut before = BTreeMap::new();
    let mut after = BTreeMap::new();
    if let Some(doc) = old {
        flatten(doc, &mut before);
    }
    if let Some(doc) = new {
        flatten(doc, &mut after);
    }
    for (id, doc) in &after {
        match before.get(id) {
            None => builder.record(&container, id, ChangeKind::New),
            Some(prev) if !same_own_content(prev, doc) => {
                builder.record(&container, id, ChangeKind::Changed);
            }
            Some(_) => {}
        }
    }
    for id in before.keys().filter(|id| !after.contains_key(*id)) {
        builder.record(&container, id, ChangeKind::Removed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::main_branch;
    use revdb_storage::InMemoryBackend;

    fn info() -> CommitInfo {
        CommitInfo {
            author: "tester".into(),
            comment: "test".into(),
            merge_source: None,
        }
    }

    fn apply(index: &DocumentIndex, planned: &PlannedCommit) {
        for op in &planned.ops {
            op.apply(index).unwrap();
        }
    }

    fn setup() -> (DocumentIndex, RevisionBranch) {
        let index = DocumentIndex::open(Box::new(InMemoryBackend::new())).unwrap();
        let main = main_branch(Timestamp::new(1));
        index.index(IndexDocument::Branch(main.clone())).unwrap();
        (index, main)
    }

    #[test]
    fn classifies_new_changed_and_removed() {
        let (index, main) = setup();
        let mappings = Mappings::new();
        let e1 = Document::new("E1", "concept").with_field("field1", "field1");

        let first = plan(&index, &mappings, &main, Timestamp::new(2), info(), &ChangeSet::new().upsert(e1.clone()))
            .unwrap()
            .unwrap();
        apply(&index, &first);
        let change = first.commit.changes_by_container(&EntityId::new("E1")).unwrap();
        assert_eq!(change.new_components, vec![EntityId::new("E1")]);

        // unchanged content is dropped
        let noop = plan(&index, &mappings, &first.branch, Timestamp::new(3), info(), &ChangeSet::new().upsert(e1.clone()))
            .unwrap();
        assert!(noop.is_none());

        let changed = e1.with_field("field1", "field1Changed");
        let second = plan(&index, &mappings, &first.branch, Timestamp::new(3), info(), &ChangeSet::new().upsert(changed))
            .unwrap()
            .unwrap();
        apply(&index, &second);
        assert_eq!(second.commit.kind_of(&EntityId::new("E1")), Some(ChangeKind::Changed));

        let third = plan(&index, &mappings, &second.branch, Timestamp::new(4), info(), &ChangeSet::new().remove("E1"))
            .unwrap()
            .unwrap();
        apply(&index, &third);
        assert_eq!(third.commit.kind_of(&EntityId::new("E1")), Some(ChangeKind::Removed));

        let view = third.branch.view();
        assert!(index.visible_row(&EntityId::new("E1"), &view).is_none());
        let history = history(&index, &view, &EntityId::new("E1"));
        let kinds: Vec<_> = history.iter().map(|c| c.kind_of(&EntityId::new("E1"))).collect();
        assert_eq!(
            kinds,
            vec![Some(ChangeKind::Removed), Some(ChangeKind::Changed), Some(ChangeKind::New)]
        );
    }

    #[test]
    fn nested_components_group_under_container() {
        let (index, main) = setup();
        let mappings = Mappings::new().nested("description", "concept");
        let c1 = Document::new("C1", "concept")
            .with_nested(Document::new("D1", "description").with_field("term", "heart"));
        let first = plan(&index, &mappings, &main, Timestamp::new(2), info(), &ChangeSet::new().upsert(c1.clone()))
            .unwrap()
            .unwrap();
        apply(&index, &first);

        let mut edited = c1.clone();
        edited.nested[0].set_field("term", "cardiac");
        let edited = edited.with_nested(Document::new("D2", "description"));
        let second = plan(&index, &mappings, &first.branch, Timestamp::new(3), info(), &ChangeSet::new().upsert(edited))
            .unwrap()
            .unwrap();
        let change = second.commit.changes_by_container(&EntityId::new("C1")).unwrap();
        assert_eq!(change.changed_components, vec![EntityId::new("D1")]);
        assert_eq!(change.new_components, vec![EntityId::new("D2")]);
        assert!(second.commit.kind_of(&EntityId::new("C1")).is_none());

        let nested_write = ChangeSet::new().upsert(Document::new("D3", "description"));
        assert!(plan(&index, &mappings, &first.branch, Timestamp::new(3), info(), &nested_write).is_err());
    }

    #[test]
    fn validation_happens_before_planning() {
        let (index, main) = setup();
        let mappings = Mappings::new();
        let dup = ChangeSet::new()
            .upsert(Document::new("E1", "concept"))
            .remove("E1");
        assert!(matches!(
            plan(&index, &mappings, &main, Timestamp::new(2), info(), &dup),
            Err(CoreError::BadRequest { .. })
        ));
        let missing = ChangeSet::new().remove("E9");
        assert!(plan(&index, &mappings, &main, Timestamp::new(2), info(), &missing)
            .unwrap_err()
            .is_not_found());
        let stale_ts = ChangeSet::new().upsert(Document::new("E1", "concept"));
        assert!(plan(&index, &mappings, &main, Timestamp::new(1), info(), &stale_ts)
            .unwrap_err()
            .is_conflict());
    }

    #[test]
    fn expected_head_detects_overlapping_writes() {
        let (index, main) = setup();
        let mappings = Mappings::new();
        let first = plan(
            &index,
            &mappings,
            &main,
            Timestamp::new(2),
            info(),
            &ChangeSet::new().upsert(Document::new("E1", "concept")),
        )
        .unwrap()
        .unwrap();
        apply(&index, &first);

        let racing = ChangeSet::new()
            .upsert(Document::new("E1", "concept").with_field("x", 1i64))
            .expect_head(Timestamp::new(1));
        assert!(check_expected_head(&index, &first.branch, &racing)
            .unwrap_err()
            .is_conflict());

        let unrelated = ChangeSet::new()
            .upsert(Document::new("E2", "concept"))
            .expect_head(Timestamp::new(1));
        check_expected_head(&index, &first.branch, &unrelated).unwrap();
    }
}
