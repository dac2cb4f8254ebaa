//! Segment views: the visibility half of a snapshot.

use crate::revision::{Revision, RevisionStamp};
use crate::types::{SegmentId, Timestamp};
use std::collections::BTreeMap;

/// Per-segment upper bounds a snapshot may see.
///
/// A write stamped `(segment, ts)` is inside the view when the segment is
/// present and `ts` is at or below its bound.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentView {
    bounds: BTreeMap<SegmentId, Timestamp>,
}

impl SegmentView {
    /// An empty view that sees nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a view from `(segment, bound)` pairs. Duplicates keep the
    /// larger bound.
    pub fn from_bounds(bounds: impl IntoIterator<Item = (SegmentId, Timestamp)>) -> Self {
        let mut view = Self::new();
        for (segment, bound) in bounds {
            view.raise(segment, bound);
        }
        view
    }

    fn raise(&mut self, segment: SegmentId, bound: Timestamp) {
        self.bounds
            .entry(segment)
            .and_modify(|b| *b = (*b).max(bound))
            .or_insert(bound);
    }

    /// Bound for `segment`, `None` when the segment is not visible.
    #[must_use]
    pub fn bound(&self, segment: SegmentId) -> Option<Timestamp> {
        self.bounds.get(&segment).copied()
    }

    /// True if a write at `stamp` is inside the view.
    #[must_use]
    pub fn contains(&self, stamp: RevisionStamp) -> bool {
        self.bound(stamp.segment)
            .is_some_and(|bound| stamp.timestamp <= bound)
    }

    /// The visibility rule: created inside the view and not superseded
    /// inside the view.
    #[must_use]
    pub fn is_visible(&self, row: &Revision) -> bool {
        self.contains(row.created) && !row.revised.iter().any(|s| self.contains(*s))
    }

    /// Copy with every bound capped at `at`.
    #[must_use]
    pub fn at(&self, at: Timestamp) -> Self {
        Self {
            bounds: self
                .bounds
                .iter()
                .map(|(seg, bound)| (*seg, (*bound).min(at)))
                .collect(),
        }
    }

    /// Segments present in both views, each with the smaller bound.
    #[must_use]
    pub fn intersect(&self, other: &SegmentView) -> Self {
        Self {
            bounds: self
                .bounds
                .iter()
                .filter_map(|(seg, bound)| other.bound(*seg).map(|o| (*seg, (*bound).min(o))))
                .collect(),
        }
    }

    /// Segments present in either view, each with the larger bound.
    #[must_use]
    pub fn union(&self, other: &SegmentView) -> Self {
        let mut out = self.clone();
        for (seg, bound) in &other.bounds {
            out.raise(*seg, *bound);
        }
        out
    }

    /// True if everything `other` sees is also seen by `self`.
    #[must_use]
    pub fn covers(&self, other: &SegmentView) -> bool {
        other
            .bounds
            .iter()
            .all(|(seg, bound)| self.bound(*seg).is_some_and(|b| b >= *bound))
    }

    /// `(segment, bound)` pairs in segment order.
    pub fn iter(&self) -> impl Iterator<Item = (SegmentId, Timestamp)> + '_ {
        self.bounds.iter().map(|(s, b)| (*s, *b))
    }

    /// Visible segment ids.
    pub fn segments(&self) -> impl Iterator<Item = SegmentId> + '_ {
        self.bounds.keys().copied()
    }

    /// Largest bound in the view.
    #[must_use]
    pub fn max_bound(&self) -> Timestamp {
        self.bounds.values().copied().max().unwrap_or(Timestamp::ZERO)
    }

    /// True when no segment is visible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }
}
