//! Snapshot searcher.

use crate::branch::{BranchPath, SegmentView};
use crate::error::{CoreError, CoreResult};
use crate::index::{DocumentIndex, Hits, Mappings};
use crate::revision::{Document, EntityId, Revision};
use crate::search::{rewrite, Query, SnapshotPin};
use crate::types::Timestamp;
use std::sync::Arc;
use tracing::debug;

/// Read access to one branch snapshot.
///
/// The segment view is captured at creation, so later commits, merges or
/// even deletion of the branch do not change what this searcher sees.
/// While it is alive, purge keeps every row it can see.
#[derive(Debug)]
pub struct RevisionSearcher {
    index: Arc<DocumentIndex>,
    mappings: Mappings,
    branch: BranchPath,
    timestamp: Timestamp,
    view: SegmentView,
    _pin: SnapshotPin,
}

impl RevisionSearcher {
    pub(crate) fn new(
        index: Arc<DocumentIndex>,
        mappings: Mappings,
        branch: BranchPath,
        timestamp: Timestamp,
        view: SegmentView,
        pin: SnapshotPin,
    ) -> Self {
        Self {
            index,
            mappings,
            branch,
            timestamp,
            view,
            _pin: pin,
        }
    }

    /// Branch the snapshot was taken on.
    pub fn branch(&self) -> &BranchPath {
        &self.branch
    }

    /// Snapshot timestamp.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Segment bounds of the snapshot.
    pub fn view(&self) -> &SegmentView {
        &self.view
    }

    /// Runs `query` against the snapshot.
    ///
    /// # Errors
    ///
    /// Propagates rewrite errors.
    pub fn search(&self, query: &Query) -> CoreResult<Hits<Document>> {
        let request = rewrite(query, &self.view, &self.mappings)?;
        let hits = self.index.search(&request);
        debug!(
            branch = %self.branch,
            doc_type = %query.doc_type(),
            total = hits.total,
            returned = hits.len(),
            "searched snapshot"
        );
        Ok(hits)
    }

    /// The visible document with `id`.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if no row of `id` is visible.
    pub fn get(&self, id: &EntityId) -> CoreResult<Document> {
        self.get_revision(id).map(|row| row.document)
    }

    /// Visible documents among `ids`, in the order given. Missing ids are
    /// skipped.
    pub fn get_all<'a>(&self, ids: impl IntoIterator<Item = &'a EntityId>) -> Vec<Document> {
        ids.into_iter()
            .filter_map(|id| self.index.visible_row(id, &self.view))
            .map(|row| row.document)
            .collect()
    }

    /// The visible row of `id`, with its stamps.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if no row of `id` is visible.
    pub fn get_revision(&self, id: &EntityId) -> CoreResult<Revision> {
        self.index
            .visible_row(id, &self.view)
            .ok_or_else(|| CoreError::not_found("entity", format!("{id} on {}", self.branch)))
    }

    /// True if a row of `id` is visible.
    pub fn exists(&self, id: &EntityId) -> bool {
        self.index.visible_row(id, &self.view).is_some()
    }

    pub(crate) fn index(&self) -> &Arc<DocumentIndex> {
        &self.index
    }

    pub(crate) fn mappings(&self) -> &Mappings {
        &self.mappings
    }
}
