//! Commits from several threads.

use revdb_core::Config;
use revdb_testkit::prelude::*;
use std::thread;

const WRITERS: usize = 4;
const PER_WRITER: usize = 10;

#[test]
fn writers_on_one_branch_all_land() {
    let repo = TestRepository::memory_with_config(Config::new().flush_threshold(8));
    let main = BranchPath::main();

    thread::scope(|s| {
        for w in 0..WRITERS {
            let (repo, main) = (&repo, &main);
            s.spawn(move || {
                for i in 0..PER_WRITER {
                    put(repo, main, concept(&format!("W{w}-{i}"), "written"));
                }
            });
        }
    });

    let searcher = repo.read(&main).unwrap();
    for w in 0..WRITERS {
        for i in 0..PER_WRITER {
            assert!(searcher.exists(&EntityId::new(format!("W{w}-{i}"))));
        }
    }
    drop(searcher);

    let mut stamps: Vec<_> = (0..WRITERS)
        .flat_map(|w| (0..PER_WRITER).map(move |i| format!("W{w}-{i}")))
        .map(|id| repo.history(&main, &EntityId::new(id)).unwrap()[0].timestamp)
        .collect();
    stamps.sort();
    stamps.dedup();
    assert_eq!(stamps.len(), WRITERS * PER_WRITER);
}

#[test]
fn writers_on_sibling_branches_stay_apart() {
    let repo = TestRepository::memory();
    let main = BranchPath::main();
    let paths: Vec<BranchPath> = (0..WRITERS)
        .map(|w| repo.create_branch(&main, &format!("w{w}")).unwrap().path)
        .collect();

    thread::scope(|s| {
        for path in &paths {
            let repo = &repo;
            s.spawn(move || {
                for i in 0..PER_WRITER {
                    put(repo, path, concept(&format!("E{i}"), path.as_str()));
                }
            });
        }
    });

    for path in &paths {
        for i in 0..PER_WRITER {
            assert_eq!(term(&repo, path, &format!("E{i}")).as_deref(), Some(path.as_str()));
        }
    }
    assert!(term(&repo, &main, "E0").is_none());

    let repo = repo.restart();
    for path in &paths {
        assert_eq!(term(&repo, path, "E9").as_deref(), Some(path.as_str()));
    }
}

#[test]
fn deleting_an_ancestor_never_rolls_back_descendant_commits() {
    for round in 0..40 {
        let repo = TestRepository::memory();
        let main = BranchPath::main();
        let a = repo.create_branch(&main, "a").unwrap().path;
        let b = repo.create_branch(&a, "b").unwrap().path;

        let acknowledged = thread::scope(|s| {
            let writer = s.spawn(|| {
                let mut done = Vec::new();
                for i in 0..20 {
                    let doc = concept(&format!("B{i}"), "on b");
                    match repo.commit(&b, "tester", "put", ChangeSet::new().upsert(doc)) {
                        Ok(_) => done.push(format!("B{i}")),
                        Err(e) => {
                            assert!(!e.is_not_found(), "round {round}: {e}");
                            break;
                        }
                    }
                }
                done
            });
            s.spawn(|| repo.delete_branch(&a).unwrap());
            writer.join().unwrap()
        });

        let stale = repo.branch(&b).unwrap();
        assert_eq!(stale.state, revdb_core::BranchState::Stale);
        let searcher = repo.read(&b).unwrap();
        for id in &acknowledged {
            assert!(searcher.exists(&EntityId::new(id.as_str())), "round {round}: {id} lost");
        }
    }
}
