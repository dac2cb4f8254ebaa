//! The write-ahead log.

use crate::error::{CoreError, CoreResult};
use crate::index::DocumentIndex;
use crate::types::Generation;
use crate::wal::record::{CommitPoint, WalRecord};
use crate::wal::{WalOperation, WalRecordIterator};
use parking_lot::Mutex;
use revdb_storage::{StorageBackend, StorageResult};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug)]
struct LogState {
    log_uuid: Uuid,
    generation: Generation,
    next_batch: u64,
    prepared: Option<CommitPoint>,
}

/// What [`WriteAheadLog::recover`] replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecoveryReport {
    /// Operations applied to the index.
    pub replayed_ops: usize,
    /// Committed batches those operations came from.
    pub replayed_batches: usize,
    /// Whether a backend commit was made.
    pub committed: bool,
}

/// Append-only operation log with two-phase checkpointing.
///
/// Batches are framed `Begin / Operation* / Commit` and written with a
/// single append; a failed append is truncated away so no partial batch
/// survives. A checkpoint runs in three steps:
///
/// 1. [`WriteAheadLog::prepare_commit`] rolls the log to a new generation
///    and fences further appends.
/// 2. The document index commits and records the returned [`CommitPoint`].
/// 3. [`WriteAheadLog::commit`] trims the log and lifts the fence.
///
/// Lock order is state, then backend.
pub struct WriteAheadLog {
    state: Mutex<LogState>,
    backend: Mutex<Box<dyn StorageBackend>>,
    sync_on_write: bool,
}

impl WriteAheadLog {
    /// Opens the log, writing a header if it is empty.
    ///
    /// A fresh log adopts the identity in `absorbed` (the index's last
    /// commit point) so a log lost after a clean checkpoint is recreated
    /// consistently. A torn tail is truncated.
    ///
    /// # Errors
    ///
    /// Fails on corruption or I/O errors.
    pub fn open(
        backend: Box<dyn StorageBackend>,
        sync_on_write: bool,
        absorbed: Option<CommitPoint>,
    ) -> CoreResult<Self> {
        let backend = Mutex::new(backend);

        let (header, max_batch, generation, valid_len, total) = {
            let mut iter = WalRecordIterator::new(backend.lock(), 0)?;
            let mut header = None;
            let mut max_batch = 0;
            let mut generation = Generation::default();
            for item in iter.by_ref() {
                let (offset, record) = item?;
                match record {
                    WalRecord::Header {
                        log_uuid,
                        generation: g,
                    } if offset == 0 => {
                        header = Some(log_uuid);
                        generation = g;
                    }
                    WalRecord::Header { .. } => {
                        return Err(CoreError::wal_corruption(format!(
                            "unexpected header at offset {offset}"
                        )));
                    }
                    _ if header.is_none() => {
                        return Err(CoreError::wal_corruption("log does not start with a header"));
                    }
                    WalRecord::Generation { generation: g } => generation = g,
                    WalRecord::Begin { batch }
                    | WalRecord::Operation { batch, .. }
                    | WalRecord::Commit { batch } => max_batch = max_batch.max(batch),
                }
            }
            (header, max_batch, generation, iter.valid_len(), iter.total_len())
        };

        let log = match header {
            Some(log_uuid) => {
                if valid_len < total {
                    warn!(
                        discarded = total - valid_len,
                        "truncating torn tail of write-ahead log"
                    );
                    backend.lock().truncate(valid_len)?;
                }
                Self {
                    state: Mutex::new(LogState {
                        log_uuid,
                        generation,
                        next_batch: max_batch + 1,
                        prepared: None,
                    }),
                    backend,
                    sync_on_write,
                }
            }
            None => {
                let (log_uuid, generation) = absorbed.map_or_else(
                    || (Uuid::new_v4(), Generation::default()),
                    |p| (p.log_uuid, p.generation),
                );
                let bytes = WalRecord::Header {
                    log_uuid,
                    generation,
                }
                .encode()?;
                backend.lock().replace(&bytes)?;
                info!(%log_uuid, %generation, "created write-ahead log");
                Self {
                    state: Mutex::new(LogState {
                        log_uuid,
                        generation,
                        next_batch: 1,
                        prepared: None,
                    }),
                    backend,
                    sync_on_write,
                }
            }
        };
        Ok(log)
    }

    /// Identity of the log.
    #[must_use]
    pub fn log_uuid(&self) -> Uuid {
        self.state.lock().log_uuid
    }

    /// Generation new batches are written in.
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.state.lock().generation
    }

    /// True between `prepare_commit` and `commit`.
    #[must_use]
    pub fn is_prepared(&self) -> bool {
        self.state.lock().prepared.is_some()
    }

    /// Current size of the log in bytes.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot report its size.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }

    /// Appends a single operation as its own batch.
    ///
    /// # Errors
    ///
    /// See [`Self::append_batch`].
    pub fn append(&self, op: &WalOperation) -> CoreResult<u64> {
        self.append_batch(std::slice::from_ref(op))
    }

    /// Appends `ops` as one atomic batch and returns its number.
    ///
    /// # Errors
    ///
    /// [`CoreError::Conflict`] while a commit is prepared. Any I/O error
    /// truncates the log back to where the batch started and is returned.
    pub fn append_batch(&self, ops: &[WalOperation]) -> CoreResult<u64> {
        let mut state = self.state.lock();
        if state.prepared.is_some() {
            return Err(CoreError::conflict("write-ahead log is fenced by a prepared commit"));
        }

        let batch = state.next_batch;
        let mut buf = WalRecord::Begin { batch }.encode()?;
        for op in ops {
            buf.extend(
                WalRecord::Operation {
                    batch,
                    op: op.clone(),
                }
                .encode()?,
            );
        }
        buf.extend(WalRecord::Commit { batch }.encode()?);

        self.write_atomically(&buf)?;
        state.next_batch += 1;
        debug!(batch, ops = ops.len(), bytes = buf.len(), "appended batch");
        Ok(batch)
    }

    fn write_atomically(&self, buf: &[u8]) -> CoreResult<()> {
        let mut backend = self.backend.lock();
        let start = backend.size()?;
        if let Err(e) = write_all(&mut **backend, buf, self.sync_on_write) {
            if let Err(undo) = backend.truncate(start) {
                error!(error = %undo, offset = start, "could not truncate failed append");
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Rolls the log to the next generation and fences appends.
    ///
    /// # Errors
    ///
    /// [`CoreError::Conflict`] if a commit is already prepared, or an I/O
    /// error writing the marker.
    pub fn prepare_commit(&self) -> CoreResult<CommitPoint> {
        let mut state = self.state.lock();
        if state.prepared.is_some() {
            return Err(CoreError::conflict("a log commit is already prepared"));
        }
        let generation = state.generation.next();
        self.write_atomically(&WalRecord::Generation { generation }.encode()?)?;

        let point = CommitPoint {
            generation,
            log_uuid: state.log_uuid,
        };
        state.generation = generation;
        state.prepared = Some(point);
        debug!(%generation, "prepared log commit");
        Ok(point)
    }

    /// Trims the log once the index has durably recorded `point`.
    ///
    /// # Errors
    ///
    /// [`CoreError::BadRequest`] if `point` is not the prepared one, or an
    /// I/O error rewriting the log.
    pub fn commit(&self, point: CommitPoint) -> CoreResult<()> {
        let mut state = self.state.lock();
        if state.prepared != Some(point) {
            return Err(CoreError::bad_request(format!(
                "commit point {} was not prepared by this log",
                point.generation
            )));
        }
        let header = WalRecord::Header {
            log_uuid: point.log_uuid,
            generation: point.generation,
        }
        .encode()?;
        self.backend.lock().replace(&header)?;
        state.prepared = None;
        debug!(generation = %point.generation, "trimmed write-ahead log");
        Ok(())
    }

    /// Lifts the fence after the index failed to commit `point`.
    ///
    /// The generation marker stays in the log; batches before it are still
    /// newer than anything the index recorded, so recovery replays them.
    pub fn cancel(&self, point: CommitPoint) {
        let mut state = self.state.lock();
        if state.prepared == Some(point) {
            state.prepared = None;
        }
    }

    /// Forces the log to stable storage.
    ///
    /// # Errors
    ///
    /// Fails if the sync fails.
    pub fn sync(&self) -> CoreResult<()> {
        let mut backend = self.backend.lock();
        backend.flush()?;
        backend.sync()?;
        Ok(())
    }

    /// Streams records from the start of the log.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot be read.
    pub fn iter(&self) -> CoreResult<WalRecordIterator<'_>> {
        WalRecordIterator::new(self.backend.lock(), 0)
    }

    /// Replays committed batches the index has not absorbed.
    ///
    /// Batches from the index's recorded generation onward are applied in
    /// log order. If anything was applied, exactly one checkpoint follows.
    ///
    /// # Errors
    ///
    /// [`CoreError::WalCorruption`] if the log belongs to another store or
    /// is malformed; any apply or commit error. The repository must not
    /// open after a failed recovery.
    pub fn recover(&self, index: &DocumentIndex) -> CoreResult<RecoveryReport> {
        let absorbed = index.last_commit_point();
        let log_uuid = self.log_uuid();
        if let Some(point) = absorbed {
            if point.log_uuid != log_uuid {
                return Err(CoreError::wal_corruption(format!(
                    "log {log_uuid} does not belong to a store committed from log {}",
                    point.log_uuid
                )));
            }
        }
        let from = absorbed.map_or(Generation::default(), |p| p.generation);

        let mut report = RecoveryReport::default();
        {
            let mut generation = Generation::default();
            let mut open: Option<(u64, Generation, Vec<WalOperation>)> = None;
            for item in self.iter()? {
                let (offset, record) = item?;
                match record {
                    WalRecord::Header { generation: g, .. }
                    | WalRecord::Generation { generation: g } => generation = g,
                    WalRecord::Begin { batch } => {
                        if let Some((dangling, ..)) = open.replace((batch, generation, Vec::new())) {
                            warn!(batch = dangling, "discarding batch without commit record");
                        }
                    }
                    WalRecord::Operation { batch, op } => match open.as_mut() {
                        Some((current, _, ops)) if *current == batch => ops.push(op),
                        _ => {
                            return Err(CoreError::wal_corruption(format!(
                                "operation of batch {batch} outside its batch at offset {offset}"
                            )));
                        }
                    },
                    WalRecord::Commit { batch } => match open.take() {
                        Some((current, g, ops)) if current == batch => {
                            if g >= from {
                                for op in &ops {
                                    op.apply(index)?;
                                }
                                report.replayed_ops += ops.len();
                                report.replayed_batches += 1;
                            }
                        }
                        _ => {
                            return Err(CoreError::wal_corruption(format!(
                                "commit of batch {batch} without begin at offset {offset}"
                            )));
                        }
                    },
                }
            }
            if let Some((dangling, ..)) = open {
                warn!(batch = dangling, "discarding batch without commit record");
            }
        }

        if report.replayed_ops == 0 {
            info!(%from, "write-ahead log has nothing to replay");
            return Ok(report);
        }

        let point = self.prepare_commit()?;
        if let Err(e) = index.commit(point) {
            self.cancel(point);
            return Err(e);
        }
        self.commit(point)?;
        report.committed = true;
        info!(
            ops = report.replayed_ops,
            batches = report.replayed_batches,
            generation = %point.generation,
            "replayed write-ahead log"
        );
        Ok(report)
    }
}

fn write_all(backend: &mut dyn StorageBackend, buf: &[u8], sync: bool) -> StorageResult<()> {
    backend.append(buf)?;
    if sync {
        backend.flush()?;
        backend.sync()?;
    }
    Ok(())
}

impl std::fmt::Debug for WriteAheadLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteAheadLog")
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revision::{Document, EntityId, Revision, RevisionStamp};
    use crate::types::{SegmentId, Timestamp};
    use crate::wal::IndexDocument;
    use revdb_storage::InMemoryBackend;

    fn op(id: &str, ts: u64) -> WalOperation {
        let row = Revision::new(
            Document::new(id, "concept"),
            RevisionStamp::new(SegmentId::MAIN, Timestamp::new(ts)),
        )
        .unwrap();
        WalOperation::Index(IndexDocument::Revision(row))
    }

    fn open_pair(wal: &InMemoryBackend, store: &InMemoryBackend) -> (WriteAheadLog, DocumentIndex) {
        let index = DocumentIndex::open(Box::new(store.clone())).unwrap();
        let log = WriteAheadLog::open(Box::new(wal.clone()), false, index.last_commit_point()).unwrap();
        (log, index)
    }

    #[test]
    fn replays_committed_batches_once() {
        let wal = InMemoryBackend::new();
        let store = InMemoryBackend::new();
        {
            let (log, _index) = open_pair(&wal, &store);
            log.append_batch(&[op("C1", 1), op("C2", 2)]).unwrap();
            log.append(&op("C3", 3)).unwrap();
        }

        let (log, index) = open_pair(&wal, &store);
        let report = log.recover(&index).unwrap();
        assert_eq!(report.replayed_ops, 3);
        assert_eq!(report.replayed_batches, 2);
        assert!(report.committed);
        assert_eq!(index.commit_count(), 1);
        assert_eq!(log.generation(), Generation::new(1));

        // log was trimmed to a header, nothing replays twice
        drop((log, index));
        let (log, index) = open_pair(&wal, &store);
        let report = log.recover(&index).unwrap();
        assert_eq!(report, RecoveryReport::default());
        assert_eq!(index.stats().unwrap().revisions, 3);
    }

    #[test]
    fn torn_batch_is_discarded() {
        let wal = InMemoryBackend::new();
        let store = InMemoryBackend::new();
        {
            let (log, _index) = open_pair(&wal, &store);
            log.append(&op("C1", 1)).unwrap();
        }
        let full = wal.data();
        {
            let (log, _index) = open_pair(&wal, &store);
            log.append(&op("C2", 2)).unwrap();
        }
        let with_second = wal.data();
        let torn = InMemoryBackend::with_data(with_second[..with_second.len() - 3].to_vec());

        let (log, index) = open_pair(&torn, &store);
        let kept = torn.data().len();
        assert!(kept > full.len() && kept < with_second.len());
        let report = log.recover(&index).unwrap();
        assert_eq!(report.replayed_ops, 1);
        assert!(index.rows(&EntityId::new("C2")).is_empty());
    }

    #[test]
    fn crash_between_index_commit_and_trim_does_not_double_apply() {
        let wal = InMemoryBackend::new();
        let store = InMemoryBackend::new();
        {
            let (log, index) = open_pair(&wal, &store);
            log.append(&op("C1", 1)).unwrap();
            op("C1", 1).apply(&index).unwrap();
            let point = log.prepare_commit().unwrap();
            index.commit(point).unwrap();
            // crash before log.commit
        }

        let (log, index) = open_pair(&wal, &store);
        let report = log.recover(&index).unwrap();
        assert_eq!(report.replayed_ops, 0);
        assert_eq!(index.rows(&EntityId::new("C1")).len(), 1);
        assert_eq!(index.pending_ops(), 0);
    }

    #[test]
    fn prepared_log_fences_appends() {
        let (log, index) = open_pair(&InMemoryBackend::new(), &InMemoryBackend::new());
        let point = log.prepare_commit().unwrap();
        assert!(log.is_prepared());
        assert!(log.append(&op("C1", 1)).unwrap_err().is_conflict());
        assert!(log.prepare_commit().is_err());

        log.cancel(point);
        log.append(&op("C1", 1)).unwrap();
        let point = log.prepare_commit().unwrap();
        index.commit(point).unwrap();
        log.commit(point).unwrap();
        assert_eq!(log.generation(), Generation::new(2));
    }

    #[test]
    fn foreign_log_is_rejected() {
        let store = InMemoryBackend::new();
        let index = DocumentIndex::open(Box::new(store)).unwrap();
        index
            .commit(CommitPoint {
                generation: Generation::new(4),
                log_uuid: Uuid::new_v4(),
            })
            .unwrap();
        let other = InMemoryBackend::new();
        let log = WriteAheadLog::open(Box::new(other.clone()), false, None).unwrap();
        assert!(matches!(
            log.recover(&index),
            Err(CoreError::WalCorruption { .. })
        ));
    }
}
