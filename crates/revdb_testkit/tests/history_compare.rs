//! Commit history and branch comparison.

use revdb_core::{ChangeKind, CompareCategory, DocType, Document, Mappings, Query};
use revdb_testkit::prelude::*;

fn e1(value: &str) -> Document {
    Document::new("E1", "concept").with_field("field1", value)
}

#[test]
fn history_of_created_then_changed_entity() {
    let repo = TestRepository::memory();
    let main = BranchPath::main();
    let id = EntityId::new("E1");

    put(&repo, &main, e1("field1"));
    let history = repo.history(&main, &id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind_of(&id), Some(ChangeKind::New));
    let change = history[0].changes_by_container(&id).unwrap();
    assert_eq!(change.new_components, vec![id.clone()]);
    assert!(change.changed_components.is_empty());

    put(&repo, &main, e1("field1Changed"));
    let history = repo.history(&main, &id).unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].timestamp > history[1].timestamp);
    assert_eq!(history[0].kind_of(&id), Some(ChangeKind::Changed));
    assert_eq!(
        history[0].changes_by_container(&id).unwrap().changed_components,
        vec![id.clone()]
    );
    assert_eq!(history[1].kind_of(&id), Some(ChangeKind::New));
}

#[test]
fn history_of_created_then_removed_entity() {
    let repo = TestRepository::memory();
    let main = BranchPath::main();
    let id = EntityId::new("E1");

    put(&repo, &main, e1("field1"));
    remove(&repo, &main, "E1");

    let kinds: Vec<_> = repo
        .history(&main, &id)
        .unwrap()
        .iter()
        .map(|c| c.kind_of(&id))
        .collect();
    assert_eq!(kinds, vec![Some(ChangeKind::Removed), Some(ChangeKind::New)]);
}

#[test]
fn nested_components_are_recorded_under_their_container() {
    let repo = TestRepository::memory();
    repo.register_mapping(Mappings::new().nested("description", "concept"));
    let main = BranchPath::main();
    let concept_id = EntityId::new("C1");
    let d1 = EntityId::new("D1");
    let d2 = EntityId::new("D2");

    let doc = |descriptions: &[(&str, &str)]| {
        descriptions.iter().fold(
            Document::new("C1", "concept").with_field("status", "draft"),
            |doc, (id, term)| doc.with_nested(Document::new(*id, "description").with_field("term", *term)),
        )
    };

    put(&repo, &main, doc(&[("D1", "heart")]));
    let commit = put(&repo, &main, doc(&[("D1", "cardiac"), ("D2", "heart")]));

    let change = commit.changes_by_container(&concept_id).unwrap();
    assert_eq!(change.changed_components, vec![d1.clone()]);
    assert_eq!(change.new_components, vec![d2.clone()]);
    assert!(commit.kind_of(&concept_id).is_none());

    assert_eq!(repo.history(&main, &d1).unwrap().len(), 2);
    assert_eq!(repo.history(&main, &d2).unwrap().len(), 1);

    // nested documents are written through their container only
    let direct = repo.commit(
        &main,
        "t",
        "c",
        ChangeSet::new().upsert(Document::new("D3", "description")),
    );
    assert!(direct.is_err());
}

#[test]
fn history_is_scoped_to_the_branch() {
    let (repo, draft) = scenarios::forked(1);
    let main = BranchPath::main();
    let id = EntityId::new("E0");

    put(&repo, &draft, concept("E0", "draft"));
    put(&repo, &main, concept("E0", "main"));
    put(&repo, &main, concept("E0", "main again"));

    assert_eq!(repo.history(&draft, &id).unwrap().len(), 2);
    assert_eq!(repo.history(&main, &id).unwrap().len(), 3);
}

#[test]
fn compare_classifies_new_changed_and_deleted() {
    let (repo, draft) = scenarios::forked(3);
    let main = BranchPath::main();

    put(&repo, &draft, concept("E9", "new"));
    put(&repo, &draft, concept("E0", "changed"));
    remove(&repo, &draft, "E1");
    // written and then reverted: no difference remains
    put(&repo, &draft, concept("E2", "temporary"));
    put(&repo, &draft, concept("E2", "term 2"));
    // main-side commits are not part of the comparison
    put(&repo, &main, concept("E8", "main only"));

    let result = repo.compare(&main, &draft, None).unwrap();
    let ids = |category| -> Vec<String> {
        result
            .detail(&DocType::new("concept"))
            .unwrap()
            .ids(category)
            .iter()
            .map(ToString::to_string)
            .collect()
    };
    assert_eq!(ids(CompareCategory::New), vec!["E9"]);
    assert_eq!(ids(CompareCategory::Changed), vec!["E0"]);
    assert_eq!(ids(CompareCategory::Deleted), vec!["E1"]);
    assert_eq!(result.total(CompareCategory::New), 1);

    let changed = result
        .search_changed(&Query::select("concept").build())
        .unwrap();
    assert_eq!(changed.items.len(), 1);
    assert_eq!(changed.items[0].field("term").and_then(|v| v.as_text()), Some("changed"));
    let deleted = result
        .search_deleted(&Query::select("concept").build())
        .unwrap();
    assert_eq!(deleted.items[0].field("term").and_then(|v| v.as_text()), Some("term 1"));
}

#[test]
fn compare_search_round_trip_respects_the_sample() {
    let (repo, draft) = scenarios::forked(0);
    let main = BranchPath::main();
    for i in 0..5 {
        put(&repo, &draft, concept(&format!("N{i}"), "new"));
    }

    let result = repo.compare(&main, &draft, Some(3)).unwrap();
    let flagged = result.detail(&DocType::new("concept")).unwrap().clone();
    assert_eq!(flagged.new_total, 5);
    assert_eq!(flagged.new_ids.len(), 3);

    let hits = result
        .search_new(&Query::select("concept").limit(100).build())
        .unwrap();
    assert_eq!(hits.items.len(), 3);
    let mut found: Vec<_> = hits.items.iter().map(|d| d.id.clone()).collect();
    found.sort();
    assert_eq!(found, flagged.new_ids);

    let deleted = result
        .search_deleted(&Query::select("concept").build())
        .unwrap();
    assert!(deleted.is_empty());
}

#[test]
fn compare_of_identical_branches_is_empty() {
    let (repo, draft) = scenarios::forked(2);
    let result = repo.compare(&BranchPath::main(), &draft, None).unwrap();
    assert!(result.is_empty());
}
