//! The document index: published state in memory, durable state in a
//! framed store file ending in commit points.

use crate::branch::{BranchPath, RevisionBranch, SegmentView};
use crate::codec::{self, FRAME_HEADER};
use crate::commit::Commit;
use crate::error::{CoreError, CoreResult};
use crate::index::query::{Hits, MatchContext, SearchRequest, Target};
use crate::revision::{DocType, Document, EntityId, Revision};
use crate::types::{SegmentId, Timestamp};
use crate::wal::{CommitPoint, DeleteTarget, IndexDocument, RevisedMark, WalOperation};
use parking_lot::{Mutex, RwLock};
use revdb_storage::{StorageBackend, StorageResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

#[derive(Serialize)]
enum StoreRecordRef<'a> {
    Op(&'a WalOperation),
    CommitPoint(&'a CommitPoint),
}

#[derive(Deserialize)]
enum StoreRecord {
    Op(WalOperation),
    CommitPoint(CommitPoint),
}

#[derive(Debug, Default)]
struct IndexState {
    rows: BTreeMap<EntityId, Vec<Revision>>,
    by_type: BTreeMap<DocType, BTreeSet<EntityId>>,
    commits: BTreeMap<Timestamp, Commit>,
    branches: BTreeMap<BranchPath, RevisionBranch>,
}

impl IndexState {
    fn put_row(&mut self, row: Revision) {
        self.by_type
            .entry(row.doc_type().clone())
            .or_default()
            .insert(row.id().clone());
        let rows = self.rows.entry(row.id().clone()).or_default();
        match rows.iter_mut().find(|r| r.key == row.key) {
            Some(existing) => *existing = row,
            None => rows.push(row),
        }
    }

    fn remove_row(&mut self, entity: &EntityId, hash_matches: impl Fn(&Revision) -> bool) -> bool {
        let Some(rows) = self.rows.get_mut(entity) else {
            return false;
        };
        let before = rows.len();
        let doc_type = rows.first().map(|r| r.doc_type().clone());
        rows.retain(|r| !hash_matches(r));
        let removed = rows.len() != before;
        if rows.is_empty() {
            self.rows.remove(entity);
            if let Some(ids) = doc_type.and_then(|t| self.by_type.get_mut(&t)) {
                ids.remove(entity);
            }
        }
        removed
    }

    fn rows_of_type<'a>(
        &'a self,
        doc_type: &'a DocType,
    ) -> impl Iterator<Item = &'a Revision> + 'a {
        self.by_type
            .get(doc_type)
            .into_iter()
            .flatten()
            .filter_map(|id| self.rows.get(id))
            .flatten()
            .filter(move |r| r.doc_type() == doc_type)
    }

    fn all_rows(&self) -> impl Iterator<Item = &Revision> {
        self.rows.values().flatten()
    }
}

/// Counters describing the index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    /// Distinct entities with at least one row.
    pub entities: usize,
    /// Revision rows.
    pub revisions: usize,
    /// Commit records.
    pub commits: usize,
    /// Branch values, deleted ones included.
    pub branches: usize,
    /// Operations applied but not yet committed to the store.
    pub pending_ops: usize,
    /// Size of the store file.
    pub store_bytes: u64,
    /// Backend commits made by this process.
    pub commits_made: u64,
}

/// Outcome of [`DocumentIndex::optimize`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OptimizeReport {
    /// Store size before.
    pub bytes_before: u64,
    /// Store size after.
    pub bytes_after: u64,
    /// Records written.
    pub records: usize,
}

/// Opaque document search backend.
///
/// Applied operations are visible to searches immediately and queued for
/// durability; [`DocumentIndex::commit`] appends the queue plus a
/// [`CommitPoint`] to the store file and syncs it. On open, only
/// operations followed by a commit point are loaded.
pub struct DocumentIndex {
    state: RwLock<IndexState>,
    pending: Mutex<Vec<WalOperation>>,
    store: Mutex<Box<dyn StorageBackend>>,
    last_commit: RwLock<Option<CommitPoint>>,
    commits_made: AtomicU64,
}

impl DocumentIndex {
    /// Loads the committed contents of `store`.
    ///
    /// Records after the last commit point were never acknowledged by a
    /// checkpoint and are truncated; the log replays them.
    ///
    /// # Errors
    ///
    /// Fails on checksum mismatch, undecodable records or I/O errors.
    pub fn open(store: Box<dyn StorageBackend>) -> CoreResult<Self> {
        let bytes = store.read_all()?;
        let index = Self {
            state: RwLock::new(IndexState::default()),
            pending: Mutex::new(Vec::new()),
            store: Mutex::new(store),
            last_commit: RwLock::new(None),
            commits_made: AtomicU64::new(0),
        };

        let scan = codec::read_frames(&bytes)?;
        let mut buffered = Vec::new();
        let mut committed_len = 0u64;
        let mut last = None;
        for (offset, payload) in &scan.frames {
            match codec::decode::<StoreRecord>(payload)? {
                StoreRecord::Op(op) => buffered.push(op),
                StoreRecord::CommitPoint(point) => {
                    for op in buffered.drain(..) {
                        op.apply(&index)?;
                    }
                    last = Some(point);
                    committed_len = offset + (FRAME_HEADER + payload.len()) as u64;
                }
            }
        }
        index.pending.lock().clear();

        if committed_len < bytes.len() as u64 {
            warn!(
                uncommitted_ops = buffered.len(),
                discarded = bytes.len() as u64 - committed_len,
                "truncating store past last commit point"
            );
            index.store.lock().truncate(committed_len)?;
        }
        *index.last_commit.write() = last;

        let stats = index.stats()?;
        debug!(
            revisions = stats.revisions,
            commits = stats.commits,
            branches = stats.branches,
            "opened document index"
        );
        Ok(index)
    }

    fn publish(&self, op: WalOperation, mutate: impl FnOnce(&mut IndexState)) {
        let mut state = self.state.write();
        mutate(&mut state);
        self.pending.lock().push(op);
    }

    /// Inserts or replaces a document.
    ///
    /// # Errors
    ///
    /// Currently infallible; the signature leaves room for validating
    /// backends.
    pub fn index(&self, document: IndexDocument) -> CoreResult<()> {
        let op = WalOperation::Index(document.clone());
        self.publish(op, |state| match document {
            IndexDocument::Revision(row) => state.put_row(row),
            IndexDocument::Commit(commit) => {
                state.commits.insert(commit.timestamp, commit);
            }
            IndexDocument::Branch(branch) => {
                state.branches.insert(branch.path.clone(), branch);
            }
        });
        Ok(())
    }

    /// Removes a document. Missing documents are ignored.
    ///
    /// # Errors
    ///
    /// Currently infallible.
    pub fn delete(&self, target: &DeleteTarget) -> CoreResult<()> {
        self.publish(WalOperation::Delete(target.clone()), |state| match target {
            DeleteTarget::Revision(key) => {
                if !state.remove_row(&key.entity_id, |r| r.key == *key) {
                    debug!(key = %key, "delete of missing revision ignored");
                }
            }
            DeleteTarget::Commit(ts) => {
                state.commits.remove(ts);
            }
        });
        Ok(())
    }

    /// Adds superseding stamps to rows. Missing rows are ignored.
    ///
    /// # Errors
    ///
    /// Currently infallible.
    pub fn bulk_update(&self, marks: &[RevisedMark]) -> CoreResult<()> {
        self.publish(WalOperation::BulkUpdate(marks.to_vec()), |state| {
            for mark in marks {
                let row = state
                    .rows
                    .get_mut(&mark.key.entity_id)
                    .and_then(|rows| rows.iter_mut().find(|r| r.key == mark.key));
                match row {
                    Some(row) => row.mark_revised(mark.stamp),
                    None => debug!(key = %mark.key, "revised mark for missing revision ignored"),
                }
            }
        });
        Ok(())
    }

    /// Makes every applied operation durable and records `point`.
    ///
    /// # Errors
    ///
    /// On I/O failure the store is truncated back and the queue kept.
    pub fn commit(&self, point: CommitPoint) -> CoreResult<()> {
        let mut pending = self.pending.lock();
        let mut buf = Vec::new();
        for op in pending.iter() {
            buf.extend(codec::frame(&codec::encode(&StoreRecordRef::Op(op))?)?);
        }
        buf.extend(codec::frame(&codec::encode(&StoreRecordRef::CommitPoint(&point))?)?);

        let mut store = self.store.lock();
        let start = store.size()?;
        if let Err(e) = append_and_sync(&mut **store, &buf) {
            if let Err(undo) = store.truncate(start) {
                warn!(error = %undo, "could not truncate failed store commit");
            }
            return Err(e.into());
        }

        let ops = pending.len();
        pending.clear();
        *self.last_commit.write() = Some(point);
        self.commits_made.fetch_add(1, Ordering::SeqCst);
        debug!(ops, generation = %point.generation, "committed document index");
        Ok(())
    }

    /// The commit point recorded by the last successful commit.
    #[must_use]
    pub fn last_commit_point(&self) -> Option<CommitPoint> {
        *self.last_commit.read()
    }

    /// Backend commits made since this index was opened.
    #[must_use]
    pub fn commit_count(&self) -> u64 {
        self.commits_made.load(Ordering::SeqCst)
    }

    /// Operations applied since the last commit.
    #[must_use]
    pub fn pending_ops(&self) -> usize {
        self.pending.lock().len()
    }

    /// Runs a scoped search.
    #[must_use]
    pub fn search(&self, request: &SearchRequest) -> Hits<Document> {
        let state = self.state.read();
        let mut docs: Vec<Document> = match &request.target {
            Target::Type(doc_type) => state
                .rows_of_type(doc_type)
                .filter(|row| request.filter.matches(&MatchContext::row(row)))
                .map(|row| row.document.clone())
                .collect(),
            Target::Nested { doc_type, parent } => {
                let mut out = Vec::new();
                for row in state.rows_of_type(parent) {
                    let mut nested = Vec::new();
                    collect_nested(&row.document, doc_type, &mut nested);
                    out.extend(
                        nested
                            .into_iter()
                            .filter(|doc| request.filter.matches(&MatchContext::nested(doc, row)))
                            .cloned(),
                    );
                }
                out
            }
        };
        drop(state);

        docs.sort_by(|a, b| {
            request
                .sort
                .iter()
                .map(|key| key.compare(a, b))
                .find(|o| o.is_ne())
                .unwrap_or_else(|| a.id.cmp(&b.id))
        });

        let total = docs.len();
        let items: Vec<Document> = docs
            .into_iter()
            .skip(request.offset)
            .take(request.limit)
            .map(|doc| match &request.fields {
                Some(fields) => doc.project(fields),
                None => doc,
            })
            .collect();
        let scores = request.with_scores.then(|| vec![1.0; items.len()]);
        Hits {
            items,
            total,
            limit: request.limit,
            offset: request.offset,
            scores,
        }
    }

    /// Every row of an entity, any branch.
    #[must_use]
    pub fn rows(&self, id: &EntityId) -> Vec<Revision> {
        self.state.read().rows.get(id).cloned().unwrap_or_default()
    }

    /// The row of `id` visible in `view`. With several visible rows, which
    /// only happens inside an unresolved merge, the newest wins.
    #[must_use]
    pub fn visible_row(&self, id: &EntityId, view: &SegmentView) -> Option<Revision> {
        let state = self.state.read();
        state
            .rows
            .get(id)?
            .iter()
            .filter(|r| view.is_visible(r))
            .max_by_key(|r| r.created.timestamp)
            .cloned()
    }

    /// Rows accepted by `keep`.
    pub fn scan(&self, mut keep: impl FnMut(&Revision) -> bool) -> Vec<Revision> {
        self.state
            .read()
            .all_rows()
            .filter(|r| keep(r))
            .cloned()
            .collect()
    }

    /// Commits visible in `view`, oldest first.
    #[must_use]
    pub fn commits_visible(&self, view: &SegmentView) -> Vec<Commit> {
        self.state
            .read()
            .commits
            .values()
            .filter(|c| view.contains(c.stamp()))
            .cloned()
            .collect()
    }

    /// The commit at `ts`.
    #[must_use]
    pub fn commit_at(&self, ts: Timestamp) -> Option<Commit> {
        self.state.read().commits.get(&ts).cloned()
    }

    /// Commits accepted by `keep`, oldest first.
    pub fn scan_commits(&self, mut keep: impl FnMut(&Commit) -> bool) -> Vec<Commit> {
        self.state
            .read()
            .commits
            .values()
            .filter(|c| keep(c))
            .cloned()
            .collect()
    }

    /// The stored value at `path`, deleted branches included.
    #[must_use]
    pub fn branch(&self, path: &BranchPath) -> Option<RevisionBranch> {
        self.state.read().branches.get(path).cloned()
    }

    /// Every stored branch value in path order.
    #[must_use]
    pub fn branches(&self) -> Vec<RevisionBranch> {
        self.state.read().branches.values().cloned().collect()
    }

    /// Highest segment id referenced by any branch.
    #[must_use]
    pub fn max_segment(&self) -> Option<SegmentId> {
        self.state
            .read()
            .branches
            .values()
            .flat_map(|b| b.all_segments().map(|s| s.id))
            .max()
    }

    /// Highest timestamp of any commit or branch head.
    #[must_use]
    pub fn max_timestamp(&self) -> Timestamp {
        let state = self.state.read();
        let commits = state.commits.keys().next_back().copied();
        let heads = state.branches.values().map(|b| b.head_timestamp).max();
        commits.max(heads).unwrap_or(Timestamp::ZERO)
    }

    /// Rewrites the store to hold only the live state and the last commit
    /// point.
    ///
    /// # Errors
    ///
    /// [`CoreError::BadRequest`] while operations are pending, or any I/O
    /// error replacing the store.
    pub fn optimize(&self) -> CoreResult<OptimizeReport> {
        let state = self.state.read();
        if !self.pending.lock().is_empty() {
            return Err(CoreError::bad_request(
                "document index has uncommitted operations; flush before optimizing",
            ));
        }
        let Some(point) = self.last_commit_point() else {
            return Ok(OptimizeReport::default());
        };

        let ops: Vec<WalOperation> = state
            .branches
            .values()
            .map(|b| WalOperation::Index(IndexDocument::Branch(b.clone())))
            .chain(
                state
                    .all_rows()
                    .map(|r| WalOperation::Index(IndexDocument::Revision(r.clone()))),
            )
            .chain(
                state
                    .commits
                    .values()
                    .map(|c| WalOperation::Index(IndexDocument::Commit(c.clone()))),
            )
            .collect();

        let mut buf = Vec::new();
        for op in &ops {
            buf.extend(codec::frame(&codec::encode(&StoreRecordRef::Op(op))?)?);
        }
        buf.extend(codec::frame(&codec::encode(&StoreRecordRef::CommitPoint(&point))?)?);

        let mut store = self.store.lock();
        let bytes_before = store.size()?;
        store.replace(&buf)?;
        let report = OptimizeReport {
            bytes_before,
            bytes_after: store.size()?,
            records: ops.len() + 1,
        };
        info!(
            before = report.bytes_before,
            after = report.bytes_after,
            records = report.records,
            "optimized document index"
        );
        Ok(report)
    }

    /// Current counters.
    ///
    /// # Errors
    ///
    /// Fails if the store size cannot be read.
    pub fn stats(&self) -> CoreResult<IndexStats> {
        let state = self.state.read();
        Ok(IndexStats {
            entities: state.rows.len(),
            revisions: state.all_rows().count(),
            commits: state.commits.len(),
            branches: state.branches.len(),
            pending_ops: self.pending.lock().len(),
            store_bytes: self.store.lock().size()?,
            commits_made: self.commit_count(),
        })
    }
}

impl std::fmt::Debug for DocumentIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentIndex")
            .field("last_commit", &self.last_commit_point())
            .finish_non_exhaustive()
    }
}

fn append_and_sync(store: &mut dyn StorageBackend, buf: &[u8]) -> StorageResult<()> {
    store.append(buf)?;
    store.flush()?;
    store.sync()
}

fn collect_nested<'a>(doc: &'a Document, doc_type: &DocType, out: &mut Vec<&'a Document>) {
    for child in &doc.nested {
        if &child.doc_type == doc_type {
            out.push(child);
        }
        collect_nested(child, doc_type, out);
    }
}
