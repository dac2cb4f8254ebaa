//! Merge, squash and rebase between branches.

use revdb_core::merge::MergeContext;
use revdb_core::{
    Config, ConflictRule, ConflictType, CoreError, Document, MergeConflict, MergeKind, MergeState,
    SegmentId,
};
use revdb_testkit::prelude::*;
use std::time::Duration;

fn two_fields(id: &str, a: &str, b: &str) -> Document {
    Document::new(id, "concept").with_field("a", a).with_field("b", b)
}

#[test]
fn merge_brings_child_changes_to_the_parent() {
    let (repo, draft) = scenarios::forked(2);
    let main = BranchPath::main();
    put(&repo, &draft, concept("E0", "from draft"));
    put(&repo, &draft, concept("E5", "new on draft"));
    remove(&repo, &draft, "E1");

    let outcome = repo.merge(&draft, &main, false, "tester", "merge draft").unwrap();
    assert!(outcome.changed);
    assert!(outcome.commit.is_none());
    assert_eq!(outcome.job.state(), MergeState::Unlocked);
    assert!(outcome.job.transitions().contains(&MergeState::Committed));

    assert_eq!(term(&repo, &main, "E0").as_deref(), Some("from draft"));
    assert_eq!(term(&repo, &main, "E5").as_deref(), Some("new on draft"));
    assert!(term(&repo, &main, "E1").is_none());
    assert!(repo.compare(&main, &draft, None).unwrap().is_empty());
}

#[test]
fn merge_is_idempotent() {
    let (repo, draft) = scenarios::forked(1);
    let main = BranchPath::main();
    put(&repo, &draft, concept("E0", "from draft"));

    repo.merge(&draft, &main, false, "tester", "first").unwrap();
    let head = repo.branch(&main).unwrap().head_timestamp;
    let commits = repo.stats().unwrap().index.commits;

    let again = repo.merge(&draft, &main, false, "tester", "second").unwrap();
    assert!(!again.changed);
    assert!(again.commit.is_none());
    assert_eq!(repo.branch(&main).unwrap().head_timestamp, head);
    assert_eq!(repo.stats().unwrap().index.commits, commits);
}

#[test]
fn changes_on_both_sides_to_different_fields_are_resolved() {
    let repo = TestRepository::memory();
    let main = BranchPath::main();
    put(&repo, &main, two_fields("E1", "a0", "b0"));
    let draft = repo.create_branch(&main, "draft").unwrap().path;

    put(&repo, &draft, two_fields("E1", "a1", "b0"));
    put(&repo, &main, two_fields("E1", "a0", "b1"));

    let outcome = repo.merge(&draft, &main, false, "tester", "merge").unwrap();
    let commit = outcome.commit.expect("resolution commit");
    let source = commit.merge_source.expect("merge source recorded");
    assert_eq!(source.source, draft);
    assert_eq!(source.kind, MergeKind::Merge);

    let doc = repo.read(&main).unwrap().get(&EntityId::new("E1")).unwrap();
    assert_eq!(doc.field("a").and_then(|v| v.as_text()), Some("a1"));
    assert_eq!(doc.field("b").and_then(|v| v.as_text()), Some("b1"));

    let hits = repo
        .read(&main)
        .unwrap()
        .search(&revdb_core::Query::select("concept").build())
        .unwrap();
    assert_eq!(hits.total, 1);
}

#[test]
fn conflicting_change_refuses_the_whole_merge() {
    let (repo, draft) = scenarios::forked(2);
    let main = BranchPath::main();
    put(&repo, &draft, concept("E0", "draft value"));
    put(&repo, &draft, concept("E5", "would be new"));
    put(&repo, &main, concept("E0", "main value"));

    let err = repo.merge(&draft, &main, false, "tester", "merge").unwrap_err();
    let conflicts = err.merge_conflicts().expect("merge conflicts");
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].component_id, EntityId::new("E0"));
    assert_eq!(conflicts[0].conflict_type, ConflictType::ConflictingChange);
    assert_eq!(
        conflicts[0].conflicting_attribute,
        Some(("term".to_string(), "draft value".to_string()))
    );

    assert!(term(&repo, &main, "E5").is_none());
    assert_eq!(term(&repo, &main, "E0").as_deref(), Some("main value"));
}

#[test]
fn removal_against_change_is_a_conflict() {
    let (repo, draft) = scenarios::forked(1);
    let main = BranchPath::main();
    remove(&repo, &draft, "E0");
    put(&repo, &main, concept("E0", "changed"));

    let err = repo.merge(&draft, &main, false, "tester", "merge").unwrap_err();
    let conflicts = err.merge_conflicts().unwrap();
    assert_eq!(conflicts[0].conflict_type, ConflictType::DeletedWhileChanged);
}

#[test]
fn reference_to_removed_entity_is_a_conflict() {
    let (repo, draft) = scenarios::forked(1);
    repo.register_mapping(revdb_core::Mappings::new().reference("relationship", "destination"));
    let main = BranchPath::main();

    remove(&repo, &draft, "E0");
    put(
        &repo,
        &main,
        Document::new("R1", "relationship").with_field("destination", "E0"),
    );

    let err = repo.merge(&draft, &main, false, "tester", "merge").unwrap_err();
    let kinds: Vec<_> = err
        .merge_conflicts()
        .unwrap()
        .iter()
        .map(|c| c.conflict_type.clone())
        .collect();
    assert_eq!(kinds, vec![ConflictType::AddedInTargetAndDetachedInSource]);
}

#[test]
fn squash_copies_changes_as_one_commit() {
    let (repo, draft) = scenarios::forked(1);
    let main = BranchPath::main();
    put(&repo, &draft, concept("E0", "one"));
    put(&repo, &draft, concept("E0", "two"));
    put(&repo, &draft, concept("E7", "seven"));

    let outcome = repo.merge(&draft, &main, true, "tester", "squash").unwrap();
    let commit = outcome.commit.expect("squash commit");
    assert_eq!(commit.branch, main);
    assert!(commit.touches(&EntityId::new("E0")));
    assert!(commit.touches(&EntityId::new("E7")));
    assert_eq!(term(&repo, &main, "E0").as_deref(), Some("two"));

    // main does not see the draft segment, only the copy
    let main_branch = repo.branch(&main).unwrap();
    let draft_segment = repo.branch(&draft).unwrap().segment_id;
    assert!(main_branch.view().bound(draft_segment).is_none());

    let again = repo.merge(&draft, &main, true, "tester", "squash").unwrap();
    assert!(!again.changed);
    assert!(again.commit.is_none());
}

#[test]
fn merge_of_a_branch_into_itself_is_rejected() {
    let repo = TestRepository::memory();
    let main = BranchPath::main();
    assert!(matches!(
        repo.merge(&main, &main, false, "t", "c"),
        Err(CoreError::BadRequest { .. })
    ));
    assert!(repo.rebase(&main, &main, "t", "c").is_err());
}

#[test]
fn rebase_mints_fresh_segments() {
    let repo = TestRepository::memory();
    let main = BranchPath::main();
    let a = repo.create_branch(&main, "a").unwrap();
    let b = repo.create_branch(&a.path, "b").unwrap();
    assert_eq!(a.segment_id, SegmentId::new(1));
    assert_eq!(b.segment_id, SegmentId::new(2));

    put(&repo, &main, concept("E1", "on main"));
    let outcome = repo.rebase(&a.path, &main, "tester", "rebase").unwrap();
    assert!(outcome.changed);

    let rebased = repo.branch(&a.path).unwrap();
    assert_ne!(rebased.segment_id, a.segment_id);
    assert_eq!(rebased.segment_id, SegmentId::new(3));
    assert_eq!(repo.branch(&main).unwrap().segment_id, SegmentId::new(4));

    let own: Vec<_> = rebased.segments.iter().map(|s| s.id).collect();
    assert_eq!(own, vec![SegmentId::new(1), SegmentId::new(3)]);
    let inherited: Vec<_> = rebased.parent_segments.iter().map(|s| s.id).collect();
    assert_eq!(inherited, vec![SegmentId::MAIN, SegmentId::new(4)]);
    assert!(rebased.parent_segments.iter().all(|s| s.end.is_some()));

    assert_eq!(term(&repo, &a.path, "E1").as_deref(), Some("on main"));
    // b was forked before the rebase and keeps its old view
    assert!(term(&repo, &b.path, "E1").is_none());
}

#[test]
fn rebase_keeps_child_work_and_resolves_overlaps() {
    let repo = TestRepository::memory();
    let main = BranchPath::main();
    put(&repo, &main, two_fields("E1", "a0", "b0"));
    put(&repo, &main, concept("E2", "untouched"));
    let draft = repo.create_branch(&main, "draft").unwrap().path;

    put(&repo, &draft, two_fields("E1", "a1", "b0"));
    put(&repo, &draft, concept("E3", "draft only"));
    put(&repo, &main, two_fields("E1", "a0", "b1"));
    put(&repo, &main, concept("E2", "main changed"));

    let outcome = repo.rebase(&draft, &main, "tester", "rebase").unwrap();
    let commit = outcome.commit.expect("resolution commit for E1");
    assert_eq!(commit.merge_source.unwrap().kind, MergeKind::Rebase);

    let doc = repo.read(&draft).unwrap().get(&EntityId::new("E1")).unwrap();
    assert_eq!(doc.field("a").and_then(|v| v.as_text()), Some("a1"));
    assert_eq!(doc.field("b").and_then(|v| v.as_text()), Some("b1"));
    assert_eq!(term(&repo, &draft, "E2").as_deref(), Some("main changed"));
    assert_eq!(term(&repo, &draft, "E3").as_deref(), Some("draft only"));

    // main is unaffected
    assert!(term(&repo, &main, "E3").is_none());
    let main_e1 = repo.read(&main).unwrap().get(&EntityId::new("E1")).unwrap();
    assert_eq!(main_e1.field("a").and_then(|v| v.as_text()), Some("a0"));

    // nothing left to rebase
    let again = repo.rebase(&draft, &main, "tester", "again").unwrap();
    assert!(!again.changed);
}

#[test]
fn rebase_is_refused_on_conflict() {
    let (repo, draft) = scenarios::forked(1);
    let main = BranchPath::main();
    put(&repo, &draft, concept("E0", "draft"));
    put(&repo, &main, concept("E0", "main"));
    let before = repo.branch(&draft).unwrap();

    assert!(matches!(
        repo.rebase(&draft, &main, "tester", "rebase"),
        Err(CoreError::MergeConflicts { .. })
    ));
    assert_eq!(repo.branch(&draft).unwrap(), before);
}

#[test]
fn rebase_only_goes_onto_the_direct_parent() {
    let repo = TestRepository::memory();
    let main = BranchPath::main();
    let a = repo.create_branch(&main, "a").unwrap().path;
    let b = repo.create_branch(&a, "b").unwrap().path;
    put(&repo, &main, concept("E1", "on main"));
    let before = repo.branch(&b).unwrap();

    assert!(matches!(
        repo.rebase(&b, &main, "tester", "skip a level"),
        Err(CoreError::BadRequest { .. })
    ));
    assert!(matches!(
        repo.rebase(&a, &b, "tester", "upside down"),
        Err(CoreError::BadRequest { .. })
    ));
    assert_eq!(repo.branch(&b).unwrap(), before);
    assert!(repo.rebase(&b, &a, "tester", "parent").is_ok());
}

#[test]
fn merge_gives_up_on_a_busy_branch_and_releases_its_locks() {
    let repo = TestRepository::memory_with_config(Config::new().lock_timeout(Duration::from_millis(50)));
    let main = BranchPath::main();
    let a = repo.create_branch(&main, "a").unwrap().path;
    put(&repo, &a, concept("E1", "on a"));
    let main_before = repo.branch(&main).unwrap();

    let held = repo.locks().lock(&a).unwrap();
    let err = repo.merge(&a, &main, false, "tester", "merge").unwrap_err();
    assert!(matches!(err, CoreError::OperationLock { .. }));
    assert!(err.is_conflict());
    assert!(!repo.locks().is_locked(&main));
    drop(held);

    assert!(!repo.locks().is_locked(&a));
    assert_eq!(repo.branch(&main).unwrap(), main_before);
    assert!(term(&repo, &main, "E1").is_none());

    repo.merge(&a, &main, false, "tester", "merge").unwrap();
    assert_eq!(term(&repo, &main, "E1").as_deref(), Some("on a"));
}

struct FrozenType(&'static str);

impl ConflictRule for FrozenType {
    fn name(&self) -> &str {
        "frozen-type"
    }

    fn check(&self, ctx: &MergeContext<'_>) -> Vec<MergeConflict> {
        ctx.entities()
            .filter(|e| e.changed_in_source())
            .filter_map(|e| e.source.as_ref())
            .filter(|doc| doc.doc_type.as_str() == self.0)
            .map(|doc| {
                MergeConflict::new(
                    doc.id.clone(),
                    doc.doc_type.clone(),
                    ConflictType::Custom("FROZEN".to_string()),
                )
            })
            .collect()
    }
}

#[test]
fn custom_rules_take_part_in_detection() {
    let (mut repo, draft) = scenarios::forked(1);
    repo.add_conflict_rule(FrozenType("concept"));
    put(&repo, &draft, concept("E0", "draft"));

    let err = repo
        .merge(&draft, &BranchPath::main(), false, "tester", "merge")
        .unwrap_err();
    assert_eq!(
        err.merge_conflicts().unwrap()[0].conflict_type,
        ConflictType::Custom("FROZEN".to_string())
    );
}
