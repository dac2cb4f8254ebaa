//! Filter expressions and search requests understood by the document index.
//!
//! The index is a filter engine: exact, range, existence and boolean
//! matching over document fields, plus two primitives the snapshot
//! rewriter builds on. [`Expression::Stamp`] matches a row's created or
//! revised stamps against a segment bound; [`Expression::HasParent`]
//! evaluates a filter on the container row of a nested document.

use crate::revision::{DocType, Document, EntityId, FieldValue, Revision, RevisionStamp};
use crate::types::{SegmentId, Timestamp};
use serde::Serialize;
use std::cmp::Ordering;

/// Reserved field names resolved from document metadata.
pub mod fields {
    /// The document id.
    pub const ID: &str = "_id";
    /// The container id.
    pub const CONTAINER: &str = "_container";
    /// The document type.
    pub const TYPE: &str = "_type";
}

/// Which stamps of a row a [`Expression::Stamp`] inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StampField {
    /// The creation stamp.
    Created,
    /// Any of the superseding stamps.
    Revised,
}

/// A filter over documents.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Matches everything.
    MatchAll,
    /// Matches nothing.
    MatchNone,
    /// Field equals the value, or a list field contains it.
    Exact {
        /// Field name.
        field: String,
        /// Expected value.
        value: FieldValue,
    },
    /// Field equals any of the values.
    ExactAny {
        /// Field name.
        field: String,
        /// Accepted values.
        values: Vec<FieldValue>,
    },
    /// Field within inclusive bounds.
    Range {
        /// Field name.
        field: String,
        /// Lower bound.
        gte: Option<FieldValue>,
        /// Upper bound.
        lte: Option<FieldValue>,
    },
    /// Field is present and not null.
    Exists {
        /// Field name.
        field: String,
    },
    /// Boolean combination.
    Bool {
        /// All must match.
        must: Vec<Expression>,
        /// At least `minimum_should_match` must match.
        should: Vec<Expression>,
        /// None may match.
        must_not: Vec<Expression>,
        /// Required number of matching `should` clauses.
        minimum_should_match: usize,
    },
    /// The container row of a nested document matches.
    HasParent {
        /// Type of the container.
        parent_type: DocType,
        /// Filter evaluated on the container row.
        query: Box<Expression>,
    },
    /// A stamp of the row lies in `segment` at or before `upper`.
    Stamp {
        /// Created or revised.
        field: StampField,
        /// Segment to match.
        segment: SegmentId,
        /// Inclusive upper bound.
        upper: Timestamp,
    },
}

impl Expression {
    /// Exact match.
    pub fn exact(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::Exact {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Match any of the given ids.
    pub fn ids<'a>(ids: impl IntoIterator<Item = &'a EntityId>) -> Self {
        Self::ExactAny {
            field: fields::ID.to_string(),
            values: ids
                .into_iter()
                .map(|id| FieldValue::Text(id.as_str().to_string()))
                .collect(),
        }
    }

    /// Inclusive range.
    pub fn range(
        field: impl Into<String>,
        gte: Option<FieldValue>,
        lte: Option<FieldValue>,
    ) -> Self {
        Self::Range {
            field: field.into(),
            gte,
            lte,
        }
    }

    /// Field existence.
    pub fn exists(field: impl Into<String>) -> Self {
        Self::Exists {
            field: field.into(),
        }
    }

    /// Conjunction of two filters, flattening `MatchAll`.
    #[must_use]
    pub fn and(self, other: Expression) -> Self {
        match (self, other) {
            (Self::MatchAll, e) | (e, Self::MatchAll) => e,
            (a, b) => Self::Bool {
                must: vec![a, b],
                should: Vec::new(),
                must_not: Vec::new(),
                minimum_should_match: 0,
            },
        }
    }

    /// Negation.
    #[must_use]
    pub fn negate(self) -> Self {
        Self::Bool {
            must: Vec::new(),
            should: Vec::new(),
            must_not: vec![self],
            minimum_should_match: 0,
        }
    }

    /// Disjunction.
    pub fn any_of(clauses: impl IntoIterator<Item = Expression>) -> Self {
        Self::Bool {
            must: Vec::new(),
            should: clauses.into_iter().collect(),
            must_not: Vec::new(),
            minimum_should_match: 1,
        }
    }

    pub(crate) fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        match self {
            Self::MatchAll => true,
            Self::MatchNone => false,
            Self::Exact { field, value } => ctx.values(field).iter().any(|v| v == value),
            Self::ExactAny { field, values } => {
                ctx.values(field).iter().any(|v| values.contains(v))
            }
            Self::Range { field, gte, lte } => ctx.values(field).iter().any(|v| {
                gte.as_ref().map_or(true, |lo| v >= lo) && lte.as_ref().map_or(true, |hi| v <= hi)
            }),
            Self::Exists { field } => ctx.values(field).iter().any(|v| *v != FieldValue::Null),
            Self::Bool {
                must,
                should,
                must_not,
                minimum_should_match,
            } => {
                must.iter().all(|e| e.matches(ctx))
                    && !must_not.iter().any(|e| e.matches(ctx))
                    && (should.is_empty() && *minimum_should_match == 0
                        || should.iter().filter(|e| e.matches(ctx)).count()
                            >= (*minimum_should_match).max(1))
            }
            Self::HasParent { parent_type, query } => ctx.parent.is_some_and(|parent| {
                parent.doc_type() == parent_type
                    && query.matches(&MatchContext::row(parent))
            }),
            Self::Stamp {
                field,
                segment,
                upper,
            } => {
                let hit = |s: &RevisionStamp| s.segment == *segment && s.timestamp <= *upper;
                ctx.row.is_some_and(|row| match field {
                    StampField::Created => hit(&row.created),
                    StampField::Revised => row.revised.iter().any(hit),
                })
            }
        }
    }
}

/// What an expression is evaluated against.
pub(crate) struct MatchContext<'a> {
    pub doc: &'a Document,
    pub row: Option<&'a Revision>,
    pub parent: Option<&'a Revision>,
}

impl<'a> MatchContext<'a> {
    pub(crate) fn row(row: &'a Revision) -> Self {
        Self {
            doc: &row.document,
            row: Some(row),
            parent: None,
        }
    }

    pub(crate) fn nested(doc: &'a Document, parent: &'a Revision) -> Self {
        Self {
            doc,
            row: None,
            parent: Some(parent),
        }
    }

    /// Values of a field, with lists flattened.
    fn values(&self, field: &str) -> Vec<FieldValue> {
        match field {
            fields::ID => vec![FieldValue::Text(self.doc.id.as_str().to_string())],
            fields::TYPE => vec![FieldValue::Text(self.doc.doc_type.as_str().to_string())],
            fields::CONTAINER => self
                .doc
                .container_id
                .iter()
                .map(|c| FieldValue::Text(c.as_str().to_string()))
                .collect(),
            name => match self.doc.field(name) {
                Some(FieldValue::List(items)) => items.clone(),
                Some(value) => vec![value.clone()],
                None => Vec::new(),
            },
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortBy {
    /// Field name; reserved names are allowed.
    pub field: String,
    /// Direction.
    pub order: Order,
}

impl SortBy {
    /// Ascending on `field`.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: Order::Asc,
        }
    }

    /// Descending on `field`.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: Order::Desc,
        }
    }

    pub(crate) fn compare(&self, a: &Document, b: &Document) -> Ordering {
        let key = |d: &Document| match self.field.as_str() {
            fields::ID => Some(FieldValue::Text(d.id.as_str().to_string())),
            name => d.field(name).cloned(),
        };
        // missing values sort last in either direction
        match (key(a), key(b)) {
            (Some(x), Some(y)) => match self.order {
                Order::Asc => x.cmp(&y),
                Order::Desc => y.cmp(&x),
            },
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

/// Documents the search runs over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Rows of a top-level type.
    Type(DocType),
    /// Documents of a nested type inside rows of `parent`.
    Nested {
        /// Nested type.
        doc_type: DocType,
        /// Container type.
        parent: DocType,
    },
}

/// A fully scoped search handed to [`crate::index::DocumentIndex::search`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    /// What to search.
    pub target: Target,
    /// Filter including the branch filter.
    pub filter: Expression,
    /// Sort keys; ties break on id.
    pub sort: Vec<SortBy>,
    /// Hits skipped.
    pub offset: usize,
    /// Maximum hits returned.
    pub limit: usize,
    /// Projected fields, `None` for whole documents.
    pub fields: Option<Vec<String>>,
    /// Whether to report scores.
    pub with_scores: bool,
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hits<T> {
    /// The page.
    pub items: Vec<T>,
    /// Total number of matches before paging.
    pub total: usize,
    /// Limit the page was cut with.
    pub limit: usize,
    /// Offset the page starts at.
    pub offset: usize,
    /// Per-item scores when requested. Filters do not rank, so every
    /// hit scores 1.0.
    pub scores: Option<Vec<f32>>,
}

impl<T> Hits<T> {
    /// An empty page.
    #[must_use]
    pub fn empty(limit: usize, offset: usize) -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            limit,
            offset,
            scores: None,
        }
    }

    /// Number of items on the page.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when the page is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Hits<Document> {
    /// Ids of the documents on the page.
    #[must_use]
    pub fn ids(&self) -> Vec<&EntityId> {
        self.items.iter().map(|d| &d.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revision::RevisionStamp;

    fn row(doc: Document, seg: u32, ts: u64) -> Revision {
        Revision::new(
            doc,
            RevisionStamp::new(SegmentId::new(seg), Timestamp::new(ts)),
        )
        .unwrap()
    }

    #[test]
    fn field_filters() {
        let r = row(
            Document::new("C1", "concept")
                .with_field("status", "primitive")
                .with_field("parents", vec!["C0", "C9"])
                .with_field("depth", 3i64),
            0,
            1,
        );
        let ctx = MatchContext::row(&r);
        assert!(Expression::exact("status", "primitive").matches(&ctx));
        assert!(Expression::exact("parents", "C9").matches(&ctx));
        assert!(!Expression::exact("parents", "C2").matches(&ctx));
        assert!(Expression::range("depth", Some(2i64.into()), Some(3i64.into())).matches(&ctx));
        assert!(!Expression::range("depth", Some(4i64.into()), None).matches(&ctx));
        assert!(Expression::exists("depth").matches(&ctx));
        assert!(!Expression::exists("missing").matches(&ctx));
        assert!(Expression::ids([&EntityId::new("C1")]).matches(&ctx));
        assert!(Expression::exact("status", "x").negate().matches(&ctx));
    }

    #[test]
    fn stamp_and_parent_primitives() {
        let parent = row(Document::new("C1", "concept"), 1, 10);
        let nested = Document::new("D1", "description");
        let created = Expression::Stamp {
            field: StampField::Created,
            segment: SegmentId::new(1),
            upper: Timestamp::new(10),
        };
        assert!(created.matches(&MatchContext::row(&parent)));
        // stamps only exist on rows
        assert!(!created.matches(&MatchContext::nested(&nested, &parent)));

        let has_parent = Expression::HasParent {
            parent_type: DocType::new("concept"),
            query: Box::new(created),
        };
        assert!(has_parent.matches(&MatchContext::nested(&nested, &parent)));
    }

    #[test]
    fn bool_minimum_should_match() {
        let r = row(Document::new("C1", "concept").with_field("a", 1i64), 0, 1);
        let ctx = MatchContext::row(&r);
        let two_of = Expression::Bool {
            must: vec![],
            should: vec![Expression::exact("a", 1i64), Expression::exact("a", 2i64)],
            must_not: vec![],
            minimum_should_match: 2,
        };
        assert!(!two_of.matches(&ctx));
        assert!(Expression::any_of([Expression::MatchNone, Expression::MatchAll]).matches(&ctx));
        assert!(!Expression::any_of([]).matches(&ctx));
    }
}
