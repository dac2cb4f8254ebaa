//! Branch values.

use crate::branch::SegmentView;
use crate::error::{CoreError, CoreResult};
use crate::types::{SegmentId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Path of the root branch.
pub const MAIN: &str = "MAIN";

/// Maximum length of one branch name.
const MAX_NAME_LEN: usize = 50;

/// Slash-separated branch path rooted at `MAIN`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchPath(String);

impl BranchPath {
    /// The root path.
    #[must_use]
    pub fn main() -> Self {
        Self(MAIN.to_string())
    }

    /// Parses and validates a full path such as `MAIN/a/b`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BadRequest`] if the path is not rooted at
    /// `MAIN` or a segment is not a valid branch name.
    pub fn parse(path: &str) -> CoreResult<Self> {
        let mut parts = path.split('/');
        if parts.next() != Some(MAIN) {
            return Err(CoreError::bad_request(format!(
                "branch path must start with {MAIN}: {path:?}"
            )));
        }
        for name in parts {
            validate_name(name)?;
        }
        Ok(Self(path.to_string()))
    }

    /// Path of a child named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BadRequest`] for an invalid name.
    pub fn child(&self, name: &str) -> CoreResult<Self> {
        validate_name(name)?;
        Ok(Self(format!("{}/{name}", self.0)))
    }

    /// Path of the parent, `None` for `MAIN`.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.0.rfind('/').map(|i| Self(self.0[..i].to_string()))
    }

    /// Last path segment.
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Number of ancestors; zero for `MAIN`.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.matches('/').count()
    }

    /// True for the root branch.
    #[must_use]
    pub fn is_main(&self) -> bool {
        self.0 == MAIN
    }

    /// True if `self` is a strict ancestor of `other`.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &BranchPath) -> bool {
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'/'
    }

    /// Returns the path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn validate_name(name: &str) -> CoreResult<()> {
    let valid = (1..=MAX_NAME_LEN).contains(&name.len())
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b'~'));
    if valid {
        Ok(())
    } else {
        Err(CoreError::bad_request(format!(
            "invalid branch name {name:?}: expected 1..={MAX_NAME_LEN} of [A-Za-z0-9_.~-]"
        )))
    }
}

/// Lifecycle state of a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchState {
    /// Readable and writable.
    Active,
    /// An ancestor was deleted; readable only.
    Stale,
    /// Soft-deleted; lookups fail.
    Deleted,
}

impl fmt::Display for BranchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "ACTIVE",
            Self::Stale => "STALE",
            Self::Deleted => "DELETED",
        })
    }
}

/// A span of one segment's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionSegment {
    /// Segment id.
    pub id: SegmentId,
    /// Timestamp the segment was opened at.
    pub start: Timestamp,
    /// Last visible timestamp; `None` while the branch still writes into it.
    pub end: Option<Timestamp>,
}

impl RevisionSegment {
    /// An open segment starting at `start`.
    #[must_use]
    pub const fn open(id: SegmentId, start: Timestamp) -> Self {
        Self {
            id,
            start,
            end: None,
        }
    }

    /// A copy closed at `end`, or at the earlier existing end.
    #[must_use]
    pub fn closed_at(self, end: Timestamp) -> Self {
        Self {
            end: Some(self.end.map_or(end, |e| e.min(end))),
            ..self
        }
    }

    /// True while the segment accepts writes.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.end.is_none()
    }
}

/// A branch as an immutable value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionBranch {
    /// Unique path.
    pub path: BranchPath,
    /// Parent path, `None` for `MAIN`.
    pub parent_path: Option<BranchPath>,
    /// Parent head this branch was forked or last rebased from.
    pub base_timestamp: Timestamp,
    /// Timestamp of the latest commit visible on the branch.
    pub head_timestamp: Timestamp,
    /// Segment new writes go into.
    pub segment_id: SegmentId,
    /// Segments holding this branch's own history.
    pub segments: Vec<RevisionSegment>,
    /// Segments inherited from ancestors, always closed.
    pub parent_segments: Vec<RevisionSegment>,
    /// Lifecycle state.
    pub state: BranchState,
}

impl RevisionBranch {
    /// Snapshot of everything visible at the branch head.
    #[must_use]
    pub fn view(&self) -> SegmentView {
        SegmentView::from_bounds(
            self.segments
                .iter()
                .chain(&self.parent_segments)
                .map(|seg| (seg.id, seg.end.unwrap_or(self.head_timestamp))),
        )
    }

    /// Snapshot as of `at`, for point-in-time reads.
    #[must_use]
    pub fn view_at(&self, at: Timestamp) -> SegmentView {
        self.view().at(at)
    }

    /// Every segment this branch can see, own and inherited.
    pub fn all_segments(&self) -> impl Iterator<Item = &RevisionSegment> {
        self.segments.iter().chain(&self.parent_segments)
    }

    /// Ids of the segments this branch owns.
    #[must_use]
    pub fn own_segment_ids(&self) -> Vec<SegmentId> {
        self.segments.iter().map(|s| s.id).collect()
    }

    /// True unless the branch was deleted.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.state != BranchState::Deleted
    }

    /// Fails unless the branch accepts writes.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] for deleted branches and
    /// [`CoreError::BadRequest`] for stale ones.
    pub fn ensure_writable(&self) -> CoreResult<()> {
        match self.state {
            BranchState::Active => Ok(()),
            BranchState::Stale => Err(CoreError::bad_request(format!(
                "branch {} is stale because an ancestor was deleted",
                self.path
            ))),
            BranchState::Deleted => Err(CoreError::not_found("branch", &self.path)),
        }
    }

    /// Copy with the head advanced to `head`.
    #[must_use]
    pub fn with_head(&self, head: Timestamp) -> Self {
        Self {
            head_timestamp: self.head_timestamp.max(head),
            ..self.clone()
        }
    }
}
