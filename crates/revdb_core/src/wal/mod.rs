//! Write-ahead log.
//!
//! Every mutation is appended here before it is applied to the document
//! index. The index is made durable separately, at checkpoints; the log
//! covers everything applied since the last one.
//!
//! ## Generations
//!
//! The log header carries a UUID and a generation. A checkpoint appends a
//! `Generation` marker (rolling to `g + 1`), the index records
//! `{g + 1, uuid}` as its commit point, and the log is then rewritten to a
//! bare header for `g + 1`. On open, batches written in a generation at or
//! after the recorded one are replayed, in log order, followed by exactly
//! one index commit. A crash at any step leaves either the old or the new
//! commit point in the index, and the log still holds every batch the
//! recorded point does not cover.
//!
//! ## Recovery Policy
//!
//! - Truncated envelope or payload at the tail: torn write, treated as
//!   end of log and truncated on open.
//! - Batch without a commit record: discarded.
//! - Bad magic, unknown type, newer version, checksum mismatch, or a log
//!   UUID that differs from the index's: fatal, the repository does not
//!   open.

mod iterator;
mod operation;
mod record;
mod writer;

pub use iterator::WalRecordIterator;
pub use operation::{DeleteTarget, IndexDocument, RevisedMark, WalOperation};
pub use record::{CommitPoint, WalRecord, WalRecordType, WAL_MAGIC, WAL_VERSION};
pub use writer::{RecoveryReport, WriteAheadLog};
