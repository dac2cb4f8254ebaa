//! Classifying what one snapshot changed relative to another.

use crate::error::{CoreError, CoreResult};
use crate::index::{Expression, Hits};
use crate::revision::{DocType, Document, EntityId};
use crate::search::{Query, RevisionSearcher};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

/// Kind of difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum CompareCategory {
    /// Only in the compare snapshot.
    New,
    /// In both, with different content.
    Changed,
    /// Only in the base snapshot.
    Deleted,
}

impl fmt::Display for CompareCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::New => "new",
            Self::Changed => "changed",
            Self::Deleted => "deleted",
        })
    }
}

/// Sampled ids and exact totals for one type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompareDetail {
    /// Sample of new ids.
    pub new_ids: Vec<EntityId>,
    /// Number of new ids.
    pub new_total: usize,
    /// Sample of changed ids.
    pub changed_ids: Vec<EntityId>,
    /// Number of changed ids.
    pub changed_total: usize,
    /// Sample of deleted ids.
    pub deleted_ids: Vec<EntityId>,
    /// Number of deleted ids.
    pub deleted_total: usize,
}

impl CompareDetail {
    /// Sample for `category`.
    pub fn ids(&self, category: CompareCategory) -> &[EntityId] {
        match category {
            CompareCategory::New => &self.new_ids,
            CompareCategory::Changed => &self.changed_ids,
            CompareCategory::Deleted => &self.deleted_ids,
        }
    }

    /// Exact total for `category`.
    pub fn total(&self, category: CompareCategory) -> usize {
        match category {
            CompareCategory::New => self.new_total,
            CompareCategory::Changed => self.changed_total,
            CompareCategory::Deleted => self.deleted_total,
        }
    }

    fn push(&mut self, category: CompareCategory, id: EntityId, limit: usize) {
        let (ids, total) = match category {
            CompareCategory::New => (&mut self.new_ids, &mut self.new_total),
            CompareCategory::Changed => (&mut self.changed_ids, &mut self.changed_total),
            CompareCategory::Deleted => (&mut self.deleted_ids, &mut self.deleted_total),
        };
        *total += 1;
        if ids.len() < limit {
            ids.push(id);
        }
    }
}

/// Differences between a base and a compare snapshot, grouped by type.
///
/// Holds both searchers, so rows it reports stay readable (and
/// unpurged) for as long as the result is alive.
#[derive(Debug)]
pub struct RevisionCompareResult {
    base: RevisionSearcher,
    compare: RevisionSearcher,
    limit: usize,
    details: BTreeMap<DocType, CompareDetail>,
}

impl RevisionCompareResult {
    /// The base snapshot.
    pub fn base(&self) -> &RevisionSearcher {
        &self.base
    }

    /// The compare snapshot.
    pub fn compare(&self) -> &RevisionSearcher {
        &self.compare
    }

    /// Per-category sample size.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Details of one type.
    pub fn detail(&self, doc_type: &DocType) -> Option<&CompareDetail> {
        self.details.get(doc_type)
    }

    /// Every type with differences.
    pub fn details(&self) -> &BTreeMap<DocType, CompareDetail> {
        &self.details
    }

    /// Total of `category` across types.
    pub fn total(&self, category: CompareCategory) -> usize {
        self.details.values().map(|d| d.total(category)).sum()
    }

    /// True when the snapshots do not differ.
    pub fn is_empty(&self) -> bool {
        self.details.is_empty()
    }

    /// Runs `query` over the sampled new ids of its type.
    ///
    /// # Errors
    ///
    /// See [`Self::search_category`].
    pub fn search_new(&self, query: &Query) -> CoreResult<Hits<Document>> {
        self.search_category(CompareCategory::New, query)
    }

    /// Runs `query` over the sampled changed ids of its type.
    ///
    /// # Errors
    ///
    /// See [`Self::search_category`].
    pub fn search_changed(&self, query: &Query) -> CoreResult<Hits<Document>> {
        self.search_category(CompareCategory::Changed, query)
    }

    /// Runs `query` over the sampled deleted ids of its type, on the base
    /// snapshot.
    ///
    /// # Errors
    ///
    /// See [`Self::search_category`].
    pub fn search_deleted(&self, query: &Query) -> CoreResult<Hits<Document>> {
        self.search_category(CompareCategory::Deleted, query)
    }

    /// Runs `query` restricted to the sample of `category`, with the limit
    /// capped at the sample size.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnsupportedOperation`] when `query` selects a nested
    /// type.
    pub fn search_category(&self, category: CompareCategory, query: &Query) -> CoreResult<Hits<Document>> {
        if self.compare.mappings().is_nested(query.doc_type()) {
            return Err(CoreError::unsupported(format!(
                "compare searches only top-level types, not nested {}",
                query.doc_type()
            )));
        }
        let ids = self
            .details
            .get(query.doc_type())
            .map_or(&[][..], |d| d.ids(category));
        let restricted = query.restricted(Expression::ids(ids), query.limit().min(ids.len()));
        let searcher = match category {
            CompareCategory::Deleted => &self.base,
            CompareCategory::New | CompareCategory::Changed => &self.compare,
        };
        searcher.search(&restricted)
    }
}

/// Compares `compare` against `base`, keeping at most `limit` sample ids
/// per type and category.
///
/// Only entities touched by commits visible in `compare` and not in
/// `base` are classified. Nested components are reported through their
/// container, and entities whose content ended up equal are skipped.
///
/// # Errors
///
/// Currently infallible; kept fallible for symmetry with the other verbs.
pub fn compare(
    base: RevisionSearcher,
    compare: RevisionSearcher,
    limit: usize,
) -> CoreResult<RevisionCompareResult> {
    let index = compare.index();
    let commits: Vec<_> = index
        .commits_visible(compare.view())
        .into_iter()
        .filter(|c| !base.view().contains(c.stamp()))
        .collect();

    let touched: BTreeSet<EntityId> = commits
        .iter()
        .flat_map(|c| c.touched_ids().into_iter().cloned())
        .collect();

    let mut details: BTreeMap<DocType, CompareDetail> = BTreeMap::new();
    for id in touched {
        let after = index.visible_row(&id, compare.view());
        let before = index.visible_row(&id, base.view());
        let (category, doc_type) = match (&before, &after) {
            (None, Some(row)) => (CompareCategory::New, row.doc_type().clone()),
            (Some(old), Some(new)) if !old.document.same_content(&new.document) => {
                (CompareCategory::Changed, new.doc_type().clone())
            }
            (Some(row), None) => (CompareCategory::Deleted, row.doc_type().clone()),
            _ => continue,
        };
        details.entry(doc_type).or_default().push(category, id, limit);
    }

    debug!(
        base = %base.branch(),
        compare = %compare.branch(),
        commits = commits.len(),
        types = details.len(),
        "compared snapshots"
    );
    Ok(RevisionCompareResult {
        base,
        compare,
        limit,
        details,
    })
}
