//! Operations carried by the log and applied to the document index.

use crate::branch::RevisionBranch;
use crate::commit::Commit;
use crate::error::CoreResult;
use crate::index::DocumentIndex;
use crate::revision::{Revision, RevisionKey, RevisionStamp};
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};

/// A document written by an [`WalOperation::Index`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexDocument {
    /// A revision row, inserted or replaced by key.
    Revision(Revision),
    /// A commit record.
    Commit(Commit),
    /// A branch value, replacing the previous value at its path.
    Branch(RevisionBranch),
}

/// What an [`WalOperation::Delete`] removes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteTarget {
    /// A revision row.
    Revision(RevisionKey),
    /// The commit at a timestamp.
    Commit(Timestamp),
}

/// Marks one row as superseded at `stamp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisedMark {
    /// Row to mark.
    pub key: RevisionKey,
    /// The superseding write.
    pub stamp: RevisionStamp,
}

/// A logged mutation of the document index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalOperation {
    /// Insert or replace a document.
    Index(IndexDocument),
    /// Remove a document.
    Delete(DeleteTarget),
    /// Add superseding stamps to existing rows.
    BulkUpdate(Vec<RevisedMark>),
}

impl WalOperation {
    /// Applies the operation to `index`.
    ///
    /// # Errors
    ///
    /// Propagates index errors; applying the same operation twice is
    /// harmless.
    pub fn apply(&self, index: &DocumentIndex) -> CoreResult<()> {
        match self {
            Self::Index(document) => index.index(document.clone()),
            Self::Delete(target) => index.delete(target),
            Self::BulkUpdate(marks) => index.bulk_update(marks),
        }
    }

    /// Operation kind, for logs and dumps.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Index(_) => "index",
            Self::Delete(_) => "delete",
            Self::BulkUpdate(_) => "bulk_update",
        }
    }

    /// Mapping the operation targets.
    #[must_use]
    pub fn mapping(&self) -> &'static str {
        match self {
            Self::Index(IndexDocument::Revision(_))
            | Self::Delete(DeleteTarget::Revision(_))
            | Self::BulkUpdate(_) => "revision",
            Self::Index(IndexDocument::Commit(_)) | Self::Delete(DeleteTarget::Commit(_)) => {
                "commit"
            }
            Self::Index(IndexDocument::Branch(_)) => "branch",
        }
    }

    /// Id of the targeted document, for logs and dumps.
    #[must_use]
    pub fn target_id(&self) -> String {
        match self {
            Self::Index(IndexDocument::Revision(row)) => row.key.to_string(),
            Self::Index(IndexDocument::Commit(commit)) => commit.id.to_string(),
            Self::Index(IndexDocument::Branch(branch)) => branch.path.to_string(),
            Self::Delete(DeleteTarget::Revision(key)) => key.to_string(),
            Self::Delete(DeleteTarget::Commit(ts)) => ts.to_string(),
            Self::BulkUpdate(marks) => format!("{} rows", marks.len()),
        }
    }
}
