//! The repository: one object owning every part of the engine.

use crate::branch::{main_branch, BranchManager, BranchPath, RevisionBranch};
use crate::commit::{self, ChangeSet, Commit, CommitInfo, MergeKind};
use crate::compare::{self, RevisionCompareResult};
use crate::config::Config;
use crate::dir::RepositoryDir;
use crate::error::{CoreError, CoreResult};
use crate::index::{DocumentIndex, IndexStats, Mappings, OptimizeReport};
use crate::lock::{BranchLockGuard, LockManager};
use crate::merge::{ConflictRule, MergeEngine, MergeEnv, MergeOutcome, MergeRequest};
use crate::purge::{self, PurgeEnv, PurgeReport, PurgeStrategy};
use crate::revision::EntityId;
use crate::search::{PinRegistry, RevisionSearcher};
use crate::types::{Generation, Timestamp, TimestampClock};
use crate::wal::{IndexDocument, RecoveryReport, WalOperation, WriteAheadLog};
use parking_lot::RwLock;
use revdb_storage::{FileBackend, InMemoryBackend, StorageBackend};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counters describing a repository.
#[derive(Debug, Clone, Serialize)]
pub struct RepositoryStats {
    /// Document index counters.
    pub index: IndexStats,
    /// Size of the write-ahead log.
    pub wal_bytes: u64,
    /// Current log generation.
    pub generation: u64,
    /// Live branches.
    pub live_branches: usize,
    /// Open read snapshots.
    pub open_snapshots: usize,
    /// Operations replayed when the repository was opened.
    pub recovered_ops: usize,
}

/// What [`Repository::reindex`] rewrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReindexReport {
    /// Lower bound of the rewrite.
    pub from: Timestamp,
    /// Revision rows created or superseded at or after `from`.
    pub revisions: usize,
    /// Commits made at or after `from`.
    pub commits: usize,
    /// Branch values whose head is at or after `from`.
    pub branches: usize,
    /// Log batches written.
    pub batches: usize,
}

/// A revision-controlled document store.
///
/// Writes go to the write-ahead log first and are then applied to the
/// document index; [`Repository::flush`] makes the index durable and trims
/// the log. Branch mutations are serialized per path. Reads work on
/// pinned snapshots and never wait for writers.
///
/// ```rust
/// use revdb_core::{BranchPath, ChangeSet, Document, Query, Repository};
///
/// let repo = Repository::open_in_memory().unwrap();
/// let main = BranchPath::main();
/// let change = ChangeSet::new().upsert(Document::new("E1", "concept").with_field("term", "heart"));
/// repo.commit(&main, "editor", "add heart", change).unwrap();
///
/// let hits = repo.read(&main).unwrap().search(&Query::select("concept").build()).unwrap();
/// assert_eq!(hits.total, 1);
/// ```
pub struct Repository {
    config: Config,
    index: Arc<DocumentIndex>,
    wal: WriteAheadLog,
    branches: BranchManager,
    locks: LockManager,
    clock: TimestampClock,
    mappings: RwLock<Mappings>,
    pins: Arc<PinRegistry>,
    merges: MergeEngine,
    checkpoint: RwLock<()>,
    recovery: RecoveryReport,
    _dir: Option<RepositoryDir>,
}

impl Repository {
    /// Opens or creates a repository directory with default settings.
    ///
    /// # Errors
    ///
    /// See [`Self::open_with_config`].
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens or creates a repository directory.
    ///
    /// # Errors
    ///
    /// [`CoreError::RepositoryLocked`] if another process has it open, and
    /// any recovery error. A repository whose log cannot be replayed does
    /// not open.
    pub fn open_with_config(path: impl AsRef<Path>, config: Config) -> CoreResult<Self> {
        let dir = RepositoryDir::open(path.as_ref(), config.create_if_missing)?;
        let wal = FileBackend::open_with_create_dirs(&dir.wal_path())?;
        let store = FileBackend::open_with_create_dirs(&dir.store_path())?;
        let mut repo = Self::open_with_backends(config, Box::new(wal), Box::new(store))?;
        info!(path = %dir.path().display(), "opened repository");
        repo._dir = Some(dir);
        Ok(repo)
    }

    /// A repository held entirely in memory.
    ///
    /// # Errors
    ///
    /// Fails only if initialization fails.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_backends(
            Config::default(),
            Box::new(InMemoryBackend::new()),
            Box::new(InMemoryBackend::new()),
        )
    }

    /// Opens a repository over explicit backends, running recovery.
    ///
    /// # Errors
    ///
    /// Store or log corruption, a log from another store, or any error
    /// replaying the log.
    pub fn open_with_backends(
        config: Config,
        wal: Box<dyn StorageBackend>,
        store: Box<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        let index = Arc::new(DocumentIndex::open(store)?);
        let wal = WriteAheadLog::open(wal, config.sync_on_write, index.last_commit_point())?;
        let recovery = wal.recover(&index)?;

        let repo = Self {
            locks: LockManager::new(config.lock_timeout),
            clock: TimestampClock::new(index.max_timestamp()),
            branches: BranchManager::new(Arc::clone(&index)),
            mappings: RwLock::new(Mappings::new()),
            pins: PinRegistry::new(),
            merges: MergeEngine::new(),
            checkpoint: RwLock::new(()),
            config,
            index,
            wal,
            recovery,
            _dir: None,
        };

        if repo.index.branch(&BranchPath::main()).is_none() {
            let main = main_branch(repo.clock.next());
            repo.write(vec![WalOperation::Index(IndexDocument::Branch(main))])?;
            repo.flush()?;
            info!("initialized repository with MAIN");
        }
        debug!(
            recovered = recovery.replayed_ops,
            next_segment = %repo.branches.allocator().peek(),
            clock = %repo.clock.last(),
            "repository ready"
        );
        Ok(repo)
    }

    /// Settings in effect.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// What recovery replayed when this repository was opened.
    pub fn recovery(&self) -> RecoveryReport {
        self.recovery
    }

    /// Adds type mappings.
    pub fn register_mapping(&self, mappings: Mappings) {
        self.mappings.write().merge(mappings);
    }

    /// Current type mappings.
    pub fn mappings(&self) -> Mappings {
        self.mappings.read().clone()
    }

    /// The per-branch lock table shared by every mutating verb.
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Adds a conflict rule to every later merge and rebase.
    pub fn add_conflict_rule(&mut self, rule: impl ConflictRule + 'static) {
        self.merges = std::mem::take(&mut self.merges).with_rule(rule);
    }

    // -- branches --

    /// Forks `name` off `parent` at its head.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] for a missing parent,
    /// [`CoreError::AlreadyExists`] for a taken path and
    /// [`CoreError::BadRequest`] for a stale parent or invalid name.
    pub fn create_branch(&self, parent: &BranchPath, name: &str) -> CoreResult<RevisionBranch> {
        let path = parent.child(name)?;
        let _guard = self.locks.lock_all(&[parent.clone(), path])?;
        let child = self.branches.plan_create(parent, name)?;
        self.write(vec![WalOperation::Index(IndexDocument::Branch(child.clone()))])?;
        info!(path = %child.path, segment = %child.segment_id, base = %child.base_timestamp, "created branch");
        Ok(child)
    }

    /// The live branch at `path`.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if missing or deleted.
    pub fn branch(&self, path: &BranchPath) -> CoreResult<RevisionBranch> {
        self.branches.get(path)
    }

    /// Live branches in path order.
    pub fn branches(&self) -> Vec<RevisionBranch> {
        self.branches.list(false)
    }

    /// Every branch value, deleted ones included.
    pub fn branches_including_deleted(&self) -> Vec<RevisionBranch> {
        self.branches.list(true)
    }

    /// Live direct children of `path`.
    pub fn children(&self, path: &BranchPath) -> Vec<RevisionBranch> {
        self.branches.children(path)
    }

    /// Deletes `path`; its descendants become stale.
    ///
    /// The branch and every live descendant are locked while the new
    /// values are planned and written, so no commit or fork on a
    /// descendant interleaves with the rewrite. Snapshots already open on
    /// the branch keep working.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] for a missing branch,
    /// [`CoreError::BadRequest`] for `MAIN`, [`CoreError::OperationLock`]
    /// if the subtree stays busy.
    pub fn delete_branch(&self, path: &BranchPath) -> CoreResult<RevisionBranch> {
        loop {
            let mut paths = vec![path.clone()];
            paths.extend(self.branches.descendants(path).into_iter().map(|b| b.path));
            let _guard = self.locks.lock_all(&paths)?;

            let (deleted, stale) = self.branches.plan_delete(path)?;
            if stale.iter().any(|b| !paths.contains(&b.path)) {
                debug!(%path, "subtree grew while locking, retrying delete");
                continue;
            }
            let count = stale.len();
            let ops = std::iter::once(deleted.clone())
                .chain(stale)
                .map(|b| WalOperation::Index(IndexDocument::Branch(b)))
                .collect();
            self.write(ops)?;
            info!(%path, stale = count, "deleted branch");
            return Ok(deleted);
        }
    }

    // -- reads --

    /// A searcher over the head of `path`.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if the branch is missing or deleted.
    pub fn read(&self, path: &BranchPath) -> CoreResult<RevisionSearcher> {
        let branch = self.branches.get(path)?;
        Ok(self.searcher(&branch, branch.head_timestamp))
    }

    /// A searcher over `path` as of `at`.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if the branch is missing or deleted.
    pub fn read_at(&self, path: &BranchPath, at: Timestamp) -> CoreResult<RevisionSearcher> {
        let branch = self.branches.get(path)?;
        Ok(self.searcher(&branch, at.min(branch.head_timestamp)))
    }

    fn searcher(&self, branch: &RevisionBranch, at: Timestamp) -> RevisionSearcher {
        let view = branch.view_at(at);
        let pin = self.pins.pin(view.clone());
        RevisionSearcher::new(
            Arc::clone(&self.index),
            self.mappings(),
            branch.path.clone(),
            at,
            view,
            pin,
        )
    }

    // -- writes --

    /// Commits `changes` to `path`.
    ///
    /// Returns `None` when every upsert equals what is already visible.
    /// Single-document change sets retry a busy branch lock up to
    /// [`Config::max_commit_retries`] times.
    ///
    /// # Errors
    ///
    /// Validation errors before anything is written, [`CoreError::Conflict`]
    /// when `changes` expected an older head and overlaps later commits,
    /// [`CoreError::OperationLock`] when the branch stays busy.
    pub fn commit(
        &self,
        path: &BranchPath,
        author: &str,
        comment: &str,
        changes: ChangeSet,
    ) -> CoreResult<Option<Commit>> {
        let _guard = self.lock_for_commit(path, changes.len())?;
        let branch = self.branches.get(path)?;
        commit::check_expected_head(&self.index, &branch, &changes)?;

        let info = CommitInfo {
            author: author.to_string(),
            comment: comment.to_string(),
            merge_source: None,
        };
        let planned = {
            let mappings = self.mappings.read();
            commit::plan(&self.index, &mappings, &branch, self.clock.next(), info, &changes)?
        };
        let Some(planned) = planned else {
            debug!(%path, "commit changed nothing");
            return Ok(None);
        };
        self.write(planned.ops)?;
        info!(
            %path,
            timestamp = %planned.commit.timestamp,
            containers = planned.commit.changes.len(),
            "committed"
        );
        Ok(Some(planned.commit))
    }

    fn lock_for_commit(&self, path: &BranchPath, size: usize) -> CoreResult<BranchLockGuard<'_>> {
        let retries = if size == 1 { self.config.max_commit_retries } else { 0 };
        let mut attempt = 0;
        loop {
            match self.locks.lock(path) {
                Err(CoreError::OperationLock { .. }) if attempt < retries => {
                    attempt += 1;
                    warn!(%path, attempt, "branch busy, retrying commit");
                }
                result => return result,
            }
        }
    }

    /// Commits on `path` that touched `id`, newest first.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if the branch is missing or deleted.
    pub fn history(&self, path: &BranchPath, id: &EntityId) -> CoreResult<Vec<Commit>> {
        let branch = self.branches.get(path)?;
        Ok(commit::history(&self.index, &branch.view(), id))
    }

    /// Compares `compare` against `base`.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if either branch is missing or deleted.
    pub fn compare(
        &self,
        base: &BranchPath,
        compare: &BranchPath,
        limit: Option<usize>,
    ) -> CoreResult<RevisionCompareResult> {
        let limit = limit.unwrap_or(self.config.default_compare_limit);
        compare::compare(self.read(base)?, self.read(compare)?, limit)
    }

    /// Merges `source` into `target`, or copies its changes as one commit
    /// with `squash`.
    ///
    /// # Errors
    ///
    /// [`CoreError::MergeConflicts`] with every conflict found, in which
    /// case nothing was written; [`CoreError::OperationLock`] if either
    /// branch stays busy.
    pub fn merge(
        &self,
        source: &BranchPath,
        target: &BranchPath,
        squash: bool,
        author: &str,
        comment: &str,
    ) -> CoreResult<MergeOutcome> {
        let kind = if squash { MergeKind::Squash } else { MergeKind::Merge };
        self.run_merge(MergeRequest {
            source: source.clone(),
            target: target.clone(),
            kind,
            author: author.to_string(),
            comment: comment.to_string(),
        })
    }

    /// Rebases `path` onto the current head of `onto`, which must be its
    /// direct parent.
    ///
    /// # Errors
    ///
    /// As [`Self::merge`], plus [`CoreError::BadRequest`] when `onto` is
    /// not the parent of `path`.
    pub fn rebase(
        &self,
        path: &BranchPath,
        onto: &BranchPath,
        author: &str,
        comment: &str,
    ) -> CoreResult<MergeOutcome> {
        self.run_merge(MergeRequest {
            source: onto.clone(),
            target: path.clone(),
            kind: MergeKind::Rebase,
            author: author.to_string(),
            comment: comment.to_string(),
        })
    }

    fn run_merge(&self, request: MergeRequest) -> CoreResult<MergeOutcome> {
        let mappings = self.mappings();
        let write = |ops: Vec<WalOperation>| self.write(ops);
        let env = MergeEnv {
            index: &self.index,
            branches: &self.branches,
            locks: &self.locks,
            clock: &self.clock,
            mappings: &mappings,
            write: &write,
        };
        self.merges.run(&env, request)
    }

    /// Compacts the history of `path`.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] for a missing branch; any write error, in
    /// which case earlier batches stay purged.
    pub fn purge(&self, path: &BranchPath, strategy: PurgeStrategy) -> CoreResult<PurgeReport> {
        let _guard = self.locks.lock(path)?;
        let branch = self.branches.get(path)?;
        let write = |ops: Vec<WalOperation>| self.write(ops);
        let flush = || self.flush();
        let env = PurgeEnv {
            index: &self.index,
            branches: &self.branches,
            pins: &self.pins,
            batch_size: self.config.purge_batch_size,
            write: &write,
            flush: &flush,
        };
        purge::purge(&env, &branch, strategy)
    }

    fn write(&self, ops: Vec<WalOperation>) -> CoreResult<()> {
        {
            let _gate = self.checkpoint.read();
            self.wal.append_batch(&ops)?;
            for op in &ops {
                op.apply(&self.index)?;
            }
        }
        if self.index.pending_ops() >= self.config.flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    // -- durability --

    /// Makes every applied operation durable in the index and trims the
    /// log.
    ///
    /// # Errors
    ///
    /// Any I/O error. The log keeps everything not yet absorbed.
    pub fn flush(&self) -> CoreResult<()> {
        let _gate = self.checkpoint.write();
        let pending = self.index.pending_ops();
        if pending == 0 {
            return Ok(());
        }
        let point = self.wal.prepare_commit()?;
        if let Err(e) = self.index.commit(point) {
            self.wal.cancel(point);
            return Err(e);
        }
        self.wal.commit(point)?;
        debug!(ops = pending, generation = %point.generation, "flushed repository");
        Ok(())
    }

    /// Forces the log to stable storage.
    ///
    /// # Errors
    ///
    /// Fails if the sync fails.
    pub fn sync(&self) -> CoreResult<()> {
        self.wal.sync()
    }

    /// Re-saves every document written at or after `from` through the log
    /// and checkpoints the result.
    ///
    /// Rows are selected when created or superseded at or after `from`.
    /// Every live branch is locked for the duration, so no write
    /// interleaves with the rewrite.
    ///
    /// # Errors
    ///
    /// [`CoreError::OperationLock`] if some branch stays busy; any write or
    /// flush error, in which case earlier batches are already durable.
    pub fn reindex(&self, from: Timestamp) -> CoreResult<ReindexReport> {
        let paths: Vec<BranchPath> = self
            .branches
            .list(false)
            .into_iter()
            .map(|b| b.path)
            .collect();
        let _guard = self.locks.lock_all(&paths)?;

        let rows = self.index.scan(|row| {
            row.created.timestamp >= from || row.revised.iter().any(|s| s.timestamp >= from)
        });
        let commits = self.index.scan_commits(|c| c.timestamp >= from);
        let branches: Vec<RevisionBranch> = self
            .branches
            .list(true)
            .into_iter()
            .filter(|b| b.head_timestamp >= from)
            .collect();

        let mut report = ReindexReport {
            from,
            revisions: rows.len(),
            commits: commits.len(),
            branches: branches.len(),
            batches: 0,
        };
        let docs: Vec<IndexDocument> = rows
            .into_iter()
            .map(IndexDocument::Revision)
            .chain(commits.into_iter().map(IndexDocument::Commit))
            .chain(branches.into_iter().map(IndexDocument::Branch))
            .collect();
        for chunk in docs.chunks(self.config.purge_batch_size.max(1)) {
            self.write(chunk.iter().cloned().map(WalOperation::Index).collect())?;
            report.batches += 1;
        }
        self.flush()?;
        info!(
            %from,
            revisions = report.revisions,
            commits = report.commits,
            branches = report.branches,
            batches = report.batches,
            "reindexed"
        );
        Ok(report)
    }

    /// Flushes, then rewrites the index store to live state only.
    ///
    /// # Errors
    ///
    /// Any flush or rewrite error.
    pub fn optimize(&self) -> CoreResult<OptimizeReport> {
        self.flush()?;
        let _gate = self.checkpoint.write();
        self.index.optimize()
    }

    /// Current counters.
    ///
    /// # Errors
    ///
    /// Fails if backend sizes cannot be read.
    pub fn stats(&self) -> CoreResult<RepositoryStats> {
        Ok(RepositoryStats {
            index: self.index.stats()?,
            wal_bytes: self.wal.size()?,
            generation: self.wal.generation().as_u64(),
            live_branches: self.branches.list(false).len(),
            open_snapshots: self.pins.len(),
            recovered_ops: self.recovery.replayed_ops,
        })
    }

    /// Current log generation.
    pub fn generation(&self) -> Generation {
        self.wal.generation()
    }

    /// Streams the records currently in the log.
    ///
    /// # Errors
    ///
    /// Fails if the log cannot be read.
    pub fn wal_records(&self) -> CoreResult<crate::wal::WalRecordIterator<'_>> {
        self.wal.iter()
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("config", &self.config)
            .field("generation", &self.wal.generation())
            .field("merges", &self.merges)
            .finish_non_exhaustive()
    }
}
