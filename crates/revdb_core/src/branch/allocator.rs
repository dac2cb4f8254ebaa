//! Segment allocation and the pure functions producing new branch values.

use crate::branch::{BranchPath, BranchState, RevisionBranch, RevisionSegment};
use crate::error::{CoreError, CoreResult};
use crate::types::{SegmentId, Timestamp};
use parking_lot::Mutex;
use std::iter;
use tracing::debug;

/// Global segment id counter.
#[derive(Debug)]
pub struct SegmentAllocator {
    next: Mutex<u32>,
}

impl SegmentAllocator {
    /// Creates an allocator whose first id is `next`.
    #[must_use]
    pub fn new(next: SegmentId) -> Self {
        Self {
            next: Mutex::new(next.as_u32()),
        }
    }

    /// Hands out the next id.
    pub fn allocate(&self) -> SegmentId {
        let mut next = self.next.lock();
        let id = SegmentId::new(*next);
        *next += 1;
        id
    }

    /// The id the next call to [`Self::allocate`] returns.
    #[must_use]
    pub fn peek(&self) -> SegmentId {
        SegmentId::new(*self.next.lock())
    }

    /// Ensures `seen` is never handed out again.
    pub fn observe(&self, seen: SegmentId) {
        let mut next = self.next.lock();
        *next = (*next).max(seen.as_u32() + 1);
    }
}

/// The root branch of a fresh repository.
#[must_use]
pub fn main_branch(created: Timestamp) -> RevisionBranch {
    RevisionBranch {
        path: BranchPath::main(),
        parent_path: None,
        base_timestamp: created,
        head_timestamp: created,
        segment_id: SegmentId::MAIN,
        segments: vec![RevisionSegment::open(SegmentId::MAIN, created)],
        parent_segments: Vec::new(),
        state: BranchState::Active,
    }
}

/// Forks `name` off `parent` at the parent's head.
///
/// The child writes into a fresh segment and inherits every segment the
/// parent can see, closed at the fork point, so later parent writes stay
/// invisible to it. The parent value is not touched.
///
/// # Errors
///
/// [`CoreError::BadRequest`] for an invalid name or a stale parent,
/// [`CoreError::NotFound`] for a deleted parent.
pub fn create_child(
    parent: &RevisionBranch,
    name: &str,
    allocator: &SegmentAllocator,
) -> CoreResult<RevisionBranch> {
    parent.ensure_writable()?;
    let path = parent.path.child(name)?;
    let segment = allocator.allocate();
    let base = parent.head_timestamp;

    debug!(path = %path, segment = %segment, base = %base, "forking branch");
    Ok(RevisionBranch {
        path,
        parent_path: Some(parent.path.clone()),
        base_timestamp: base,
        head_timestamp: base,
        segment_id: segment,
        segments: vec![RevisionSegment::open(segment, base)],
        parent_segments: parent.all_segments().map(|s| s.closed_at(base)).collect(),
        state: BranchState::Active,
    })
}

/// New values of both branches after a rebase.
#[derive(Debug, Clone)]
pub struct Rebased {
    /// The rebased child.
    pub child: RevisionBranch,
    /// The parent, now writing into a fresh segment.
    pub parent: RevisionBranch,
}

/// Moves `child` onto the current head of `parent`.
///
/// Mints a segment for the child first, then one for the parent. The
/// child's previous segment is closed at its head and kept; its inherited
/// view becomes the parent's view at the parent head. Returns `None` when
/// the parent has not moved since the child's base.
///
/// # Errors
///
/// [`CoreError::BadRequest`] unless `parent` is the direct parent of
/// `child`, plus the writability errors of either branch.
pub fn rebase(
    child: &RevisionBranch,
    parent: &RevisionBranch,
    allocator: &SegmentAllocator,
) -> CoreResult<Option<Rebased>> {
    if child.parent_path.as_ref() != Some(&parent.path) {
        return Err(CoreError::bad_request(format!(
            "{} can only be rebased onto its direct parent, not {}",
            child.path, parent.path
        )));
    }
    child.ensure_writable()?;
    parent.ensure_writable()?;
    if parent.head_timestamp <= child.base_timestamp {
        return Ok(None);
    }

    let child_segment = allocator.allocate();
    let parent_segment = allocator.allocate();
    let base = parent.head_timestamp;

    let mut new_parent = parent.clone();
    new_parent.segments = close_open(&parent.segments, parent.head_timestamp)
        .chain(iter::once(RevisionSegment::open(parent_segment, base)))
        .collect();
    new_parent.segment_id = parent_segment;

    let mut new_child = child.clone();
    new_child.segments = close_open(&child.segments, child.head_timestamp)
        .chain(iter::once(RevisionSegment::open(child_segment, base)))
        .collect();
    new_child.segment_id = child_segment;
    new_child.parent_segments = new_parent.all_segments().map(|s| s.closed_at(base)).collect();
    new_child.base_timestamp = base;
    new_child.head_timestamp = child.head_timestamp.max(base);

    debug!(
        child = %child.path,
        child_segment = %child_segment,
        parent_segment = %parent_segment,
        base = %base,
        "rebased branch"
    );
    Ok(Some(Rebased {
        child: new_child,
        parent: new_parent,
    }))
}

fn close_open(
    segments: &[RevisionSegment],
    at: Timestamp,
) -> impl Iterator<Item = RevisionSegment> + '_ {
    segments
        .iter()
        .map(move |s| if s.is_open() { s.closed_at(at) } else { *s })
}

/// Folds everything `source` can see into `target`'s view.
///
/// The target keeps its own segment id. Segments the target already sees
/// have their bound raised; unseen ones are added as closed segments. The
/// head moves up to the source head so later forks keep the folded
/// bounds. Returns `None` when the target already covers the source.
#[must_use]
pub fn fold(target: &RevisionBranch, source: &RevisionBranch) -> Option<RevisionBranch> {
    let mut out = target.clone();
    let mut changed = false;

    for seg in source.all_segments() {
        if seg.id == target.segment_id {
            continue;
        }
        let bound = seg.end.unwrap_or(source.head_timestamp);
        let existing = out
            .segments
            .iter_mut()
            .chain(out.parent_segments.iter_mut())
            .find(|s| s.id == seg.id);
        match existing {
            Some(existing) => {
                if existing.end.is_some_and(|end| end < bound) {
                    existing.end = Some(bound);
                    changed = true;
                }
            }
            None => {
                out.segments.push(RevisionSegment {
                    id: seg.id,
                    start: seg.start,
                    end: Some(bound),
                });
                changed = true;
            }
        }
    }

    if changed {
        out.head_timestamp = out.head_timestamp.max(source.head_timestamp);
    }
    changed.then_some(out)
}

/// The deleted value of `branch`.
#[must_use]
pub fn delete(branch: &RevisionBranch) -> RevisionBranch {
    RevisionBranch {
        state: BranchState::Deleted,
        ..branch.clone()
    }
}

/// The stale value of a descendant of a deleted branch.
#[must_use]
pub fn mark_stale(branch: &RevisionBranch) -> RevisionBranch {
    let state = match branch.state {
        BranchState::Active => BranchState::Stale,
        other => other,
    };
    RevisionBranch {
        state,
        ..branch.clone()
    }
}
