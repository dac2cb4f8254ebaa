//! Test fixtures and repository helpers.
//!
//! Fixtures keep their storage alive independently of the repository so
//! a test can drop the repository without flushing and open a new one
//! over the same bytes.

use revdb_core::{
    BranchPath, ChangeSet, Commit, Config, Document, EntityId, Repository,
};
use revdb_storage::InMemoryBackend;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

enum Storage {
    Memory {
        wal: InMemoryBackend,
        store: InMemoryBackend,
    },
    File(TempDir),
}

/// A test repository with restartable storage.
pub struct TestRepository {
    /// The repository instance.
    pub repo: Repository,
    config: Config,
    storage: Storage,
}

impl TestRepository {
    /// Creates an in-memory repository with default settings.
    pub fn memory() -> Self {
        Self::memory_with_config(Config::default())
    }

    /// Creates an in-memory repository.
    pub fn memory_with_config(config: Config) -> Self {
        let wal = InMemoryBackend::new();
        let store = InMemoryBackend::new();
        let repo = Repository::open_with_backends(
            config.clone(),
            Box::new(wal.clone()),
            Box::new(store.clone()),
        )
        .expect("Failed to open in-memory repository");
        Self {
            repo,
            config,
            storage: Storage::Memory { wal, store },
        }
    }

    /// Creates a repository in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = Config::default();
        let repo = Repository::open_with_config(temp_dir.path(), config.clone())
            .expect("Failed to open file repository");
        Self {
            repo,
            config,
            storage: Storage::File(temp_dir),
        }
    }

    /// Returns the repository directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        match &self.storage {
            Storage::File(dir) => Some(dir.path().to_path_buf()),
            Storage::Memory { .. } => None,
        }
    }

    /// Bytes of the in-memory log, None if file-based.
    pub fn wal_bytes(&self) -> Option<Vec<u8>> {
        match &self.storage {
            Storage::Memory { wal, .. } => Some(wal.data()),
            Storage::File(_) => None,
        }
    }

    /// Drops the repository without flushing and opens it again.
    pub fn restart(self) -> Self {
        let Self {
            repo,
            config,
            storage,
        } = self;
        drop(repo);
        let repo = match &storage {
            Storage::Memory { wal, store } => Repository::open_with_backends(
                config.clone(),
                Box::new(wal.clone()),
                Box::new(store.clone()),
            ),
            Storage::File(dir) => Repository::open_with_config(dir.path(), config.clone()),
        }
        .expect("Failed to reopen repository");
        Self {
            repo,
            config,
            storage,
        }
    }
}

impl std::ops::Deref for TestRepository {
    type Target = Repository;

    fn deref(&self) -> &Self::Target {
        &self.repo
    }
}

impl std::ops::DerefMut for TestRepository {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.repo
    }
}

/// Runs a test with a temporary in-memory repository.
pub fn with_temp_repo<F, R>(f: F) -> R
where
    F: FnOnce(&Repository) -> R,
{
    let test_repo = TestRepository::memory();
    f(&test_repo.repo)
}

/// Runs a test with a repository in a temporary directory.
pub fn with_file_repo<F, R>(f: F) -> R
where
    F: FnOnce(&Repository, &Path) -> R,
{
    let test_repo = TestRepository::file();
    let path = test_repo.path().expect("File repository should have a path");
    f(&test_repo.repo, &path)
}

/// A `concept` document with a `term` field.
pub fn concept(id: &str, term: &str) -> Document {
    Document::new(id, "concept").with_field("term", term)
}

/// A `designation` document nested in `container`.
pub fn designation(id: &str, container: &str, text: &str) -> Document {
    Document::new(id, "designation")
        .with_container(container)
        .with_field("text", text)
}

/// Commits one upsert and returns the commit.
pub fn put(repo: &Repository, path: &BranchPath, doc: Document) -> Commit {
    repo.commit(path, "tester", "put", ChangeSet::new().upsert(doc))
        .expect("commit failed")
        .expect("commit changed nothing")
}

/// Commits the removal of `id`.
pub fn remove(repo: &Repository, path: &BranchPath, id: &str) -> Commit {
    repo.commit(path, "tester", "remove", ChangeSet::new().remove(id))
        .expect("commit failed")
        .expect("commit changed nothing")
}

/// The `term` field of `id` as seen at the head of `path`.
pub fn term(repo: &Repository, path: &BranchPath, id: &str) -> Option<String> {
    let doc = repo.read(path).ok()?.get(&EntityId::new(id)).ok()?;
    doc.field("term")?.as_text().map(str::to_string)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// `MAIN` with concepts `E0..count`, and a child `MAIN/draft` forked
    /// after them.
    pub fn forked(count: usize) -> (TestRepository, BranchPath) {
        let repo = TestRepository::memory();
        let main = BranchPath::main();
        for i in 0..count {
            put(&repo, &main, concept(&format!("E{i}"), &format!("term {i}")));
        }
        let draft = repo
            .create_branch(&main, "draft")
            .expect("Failed to create draft branch");
        (repo, draft.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_restart_keeps_unflushed_commits() {
        let repo = TestRepository::memory();
        put(&repo, &BranchPath::main(), concept("E1", "heart"));
        let repo = repo.restart();
        assert!(repo.recovery().replayed_ops > 0);
        assert_eq!(term(&repo, &BranchPath::main(), "E1").as_deref(), Some("heart"));
    }

    #[test]
    fn file_repository_has_a_path() {
        with_file_repo(|repo, path| {
            assert!(path.exists());
            assert_eq!(repo.branches().len(), 1);
        });
    }

    #[test]
    fn forked_scenario() {
        let (repo, draft) = scenarios::forked(3);
        assert_eq!(term(&repo, &draft, "E2").as_deref(), Some("term 2"));
        assert_eq!(repo.branches().len(), 2);
    }
}
