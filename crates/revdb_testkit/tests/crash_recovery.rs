//! Recovery after crashes at every stage of the write path.

use proptest::prelude::*;
use revdb_core::Config;
use revdb_testkit::prelude::*;
use std::collections::BTreeMap;

fn attempt(repo: &Repository, doc: Document) -> bool {
    repo.commit(&BranchPath::main(), "tester", "attempt", ChangeSet::new().upsert(doc))
        .is_ok()
}

#[test]
fn torn_log_write_is_discarded() {
    let mut harness = CrashHarness::new();
    let main = BranchPath::main();
    put(harness.repo(), &main, concept("E1", "heart"));

    harness.wal().crash_after(10);
    assert!(!attempt(harness.repo(), concept("E2", "lung")));
    assert!(harness.wal().has_crashed());

    let repo = harness.restart();
    assert_eq!(term(repo, &main, "E1").as_deref(), Some("heart"));
    assert!(term(repo, &main, "E2").is_none());
    assert_eq!(repo.history(&main, &EntityId::new("E2")).unwrap().len(), 0);

    put(repo, &main, concept("E2", "lung"));
    let repo = harness.restart();
    assert_eq!(term(repo, &main, "E2").as_deref(), Some("lung"));
}

#[test]
fn committed_batches_are_replayed_with_one_checkpoint() {
    let mut harness = CrashHarness::new();
    let main = BranchPath::main();
    for i in 0..5 {
        put(harness.repo(), &main, concept(&format!("E{i}"), "t"));
    }
    let expected = harness.repo().read(&main).unwrap().search(
        &revdb_core::Query::select("concept").build(),
    ).unwrap();

    let repo = harness.restart();
    let report = repo.recovery();
    assert_eq!(report.replayed_batches, 5);
    assert!(report.committed);
    assert_eq!(repo.stats().unwrap().index.commits_made, 1);
    let recovered = repo
        .read(&main)
        .unwrap()
        .search(&revdb_core::Query::select("concept").build())
        .unwrap();
    assert_eq!(recovered.items, expected.items);

    let repo = harness.restart();
    assert_eq!(repo.recovery().replayed_ops, 0);
    assert!(!repo.recovery().committed);
    assert_eq!(repo.stats().unwrap().index.commits_made, 0);
    assert_eq!(repo.history(&main, &EntityId::new("E0")).unwrap().len(), 1);
}

#[test]
fn failed_store_checkpoint_keeps_the_log() {
    let mut harness = CrashHarness::new();
    let main = BranchPath::main();
    put(harness.repo(), &main, concept("E1", "heart"));

    harness.store().crash_after(0);
    assert!(harness.repo().flush().is_err());

    let repo = harness.restart();
    assert!(repo.recovery().replayed_ops > 0);
    assert_eq!(term(repo, &main, "E1").as_deref(), Some("heart"));
}

#[test]
fn torn_store_checkpoint_rolls_back_to_the_previous_one() {
    let mut harness = CrashHarness::new();
    let main = BranchPath::main();
    put(harness.repo(), &main, concept("E1", "heart"));
    harness.repo().flush().unwrap();
    put(harness.repo(), &main, concept("E1", "cardiac"));
    put(harness.repo(), &main, concept("E2", "lung"));

    harness.store().crash_after(24);
    assert!(harness.repo().flush().is_err());

    let repo = harness.restart();
    assert_eq!(term(repo, &main, "E1").as_deref(), Some("cardiac"));
    assert_eq!(term(repo, &main, "E2").as_deref(), Some("lung"));
    assert_eq!(repo.history(&main, &EntityId::new("E1")).unwrap().len(), 2);
}

#[test]
fn failed_sync_loses_nothing_acknowledged() {
    let mut harness = CrashHarness::new();
    let main = BranchPath::main();
    put(harness.repo(), &main, concept("E1", "heart"));

    harness.wal().set_fail_on_sync(true);
    assert!(!attempt(harness.repo(), concept("E2", "lung")));

    let repo = harness.restart();
    assert_eq!(term(repo, &main, "E1").as_deref(), Some("heart"));
}

#[test]
fn branch_operations_survive_a_crash() {
    let mut harness = CrashHarness::with_config(Config::new().flush_threshold(usize::MAX));
    let main = BranchPath::main();
    put(harness.repo(), &main, concept("E1", "heart"));
    let draft = harness.repo().create_branch(&main, "draft").unwrap().path;
    put(harness.repo(), &draft, concept("E1", "cardiac"));
    harness
        .repo()
        .merge(&draft, &main, false, "tester", "merge")
        .unwrap();
    let doomed = harness.repo().create_branch(&main, "doomed").unwrap().path;
    harness.repo().delete_branch(&doomed).unwrap();

    let repo = harness.restart();
    assert_eq!(term(repo, &main, "E1").as_deref(), Some("cardiac"));
    assert!(repo.branch(&doomed).is_err());
    assert_eq!(repo.branches().len(), 2);
    assert!(repo.compare(&main, &draft, None).unwrap().is_empty());
}

fn check_model(repo: &Repository, path: &BranchPath, model: &BTreeMap<usize, String>, pool: usize) {
    for entity in 0..pool {
        let id = format!("E{entity}");
        assert_eq!(
            term(repo, path, &id),
            model.get(&entity).cloned(),
            "{id} on {path}"
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn branch_scripts_match_a_simple_model(script in branch_script_strategy(4, 30)) {
        let pool = 4;
        let main = BranchPath::main();
        let mut repo = TestRepository::memory_with_config(Config::new().flush_threshold(16));
        let child = repo.create_branch(&main, "child").unwrap().path;
        let mut models: [BTreeMap<usize, String>; 2] = Default::default();

        for op in script {
            match op {
                BranchOp::Put { child: on_child, entity, term } => {
                    let path = if on_child { &child } else { &main };
                    let doc = concept(&format!("E{entity}"), &term);
                    repo.commit(path, "prop", "put", ChangeSet::new().upsert(doc)).unwrap();
                    models[usize::from(on_child)].insert(entity, term);
                }
                BranchOp::Remove { child: on_child, entity } => {
                    let path = if on_child { &child } else { &main };
                    if models[usize::from(on_child)].remove(&entity).is_some() {
                        repo.commit(path, "prop", "remove", ChangeSet::new().remove(format!("E{entity}")))
                            .unwrap();
                    }
                }
                BranchOp::Flush => repo.flush().unwrap(),
                BranchOp::Restart => repo = repo.restart(),
            }
        }

        check_model(&repo, &main, &models[0], pool);
        check_model(&repo, &child, &models[1], pool);
    }
}
