//! Error types for the revision store.

use crate::merge::MergeConflict;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the revision store.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] revdb_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A value could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// The write-ahead log is corrupted or does not belong to this store.
    #[error("WAL corruption: {message}")]
    WalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// A framed record failed its checksum.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// A branch, entity or commit does not exist.
    #[error("{kind} not found: {key}")]
    NotFound {
        /// What was looked up.
        kind: &'static str,
        /// The key that was looked up.
        key: String,
    },

    /// A branch path is already taken.
    #[error("{kind} already exists: {key}")]
    AlreadyExists {
        /// What was being created.
        kind: &'static str,
        /// The duplicate key.
        key: String,
    },

    /// The request is malformed or violates branch topology.
    #[error("bad request: {message}")]
    BadRequest {
        /// What was wrong with the request.
        message: String,
    },

    /// A concurrent writer won a race for the same data.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the race.
        message: String,
    },

    /// A branch lock could not be acquired in time.
    #[error("could not lock branch {path} within {waited_ms} ms")]
    OperationLock {
        /// The branch path that stayed locked.
        path: String,
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// A merge or rebase found conflicts and wrote nothing.
    #[error("merge produced {} conflict(s)", conflicts.len())]
    MergeConflicts {
        /// Every conflict reported by the rule set.
        conflicts: Vec<MergeConflict>,
    },

    /// The query shape is not supported by the requested operation.
    #[error("unsupported operation: {message}")]
    UnsupportedOperation {
        /// Description of the unsupported shape.
        message: String,
    },

    /// Another process holds the repository directory.
    #[error("repository locked: another process has exclusive access")]
    RepositoryLocked,

    /// The repository layout on disk is not usable.
    #[error("invalid repository format: {message}")]
    InvalidFormat {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates a not-found error.
    pub fn not_found(kind: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    /// Creates an already-exists error.
    pub fn already_exists(kind: &'static str, key: impl ToString) -> Self {
        Self::AlreadyExists {
            kind,
            key: key.to_string(),
        }
    }

    /// Creates a bad-request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates an unsupported-operation error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a WAL corruption error.
    pub fn wal_corruption(message: impl Into<String>) -> Self {
        Self::WalCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// True for missing branches, entities and commits.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True for every failure a caller resolves by retrying or by
    /// resolving merge conflicts.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::OperationLock { .. } | Self::MergeConflicts { .. }
        )
    }

    /// True for lock timeouts, the only failure retried internally.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::OperationLock { .. })
    }

    /// True for I/O and corruption failures.
    #[must_use]
    pub fn is_io_failure(&self) -> bool {
        matches!(
            self,
            Self::Storage(_)
                | Self::Io(_)
                | Self::Codec { .. }
                | Self::WalCorruption { .. }
                | Self::ChecksumMismatch { .. }
        )
    }

    /// The reported conflicts when this is a merge failure.
    #[must_use]
    pub fn merge_conflicts(&self) -> Option<&[MergeConflict]> {
        match self {
            Self::MergeConflicts { conflicts } => Some(conflicts),
            _ => None,
        }
    }
}
