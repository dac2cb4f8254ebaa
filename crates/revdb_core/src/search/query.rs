//! Immutable caller queries.

use crate::index::{Expression, SortBy};
use crate::revision::DocType;

/// Page size when the caller sets none.
pub const DEFAULT_LIMIT: usize = 50;

/// A caller query. Build one with [`Query::select`] or
/// [`Query::select_fields`].
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    doc_type: DocType,
    fields: Option<Vec<String>>,
    filter: Expression,
    sort: Vec<SortBy>,
    offset: usize,
    limit: usize,
    with_scores: bool,
}

impl Query {
    /// Selects whole documents of `doc_type`.
    pub fn select(doc_type: impl Into<DocType>) -> QueryBuilder {
        QueryBuilder::new(doc_type.into(), None)
    }

    /// Selects only `fields`; finish with [`FieldSelect::from`].
    pub fn select_fields<I, S>(fields: I) -> FieldSelect
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldSelect {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Selected type.
    pub fn doc_type(&self) -> &DocType {
        &self.doc_type
    }

    /// Projected fields, `None` for whole documents.
    pub fn fields(&self) -> Option<&[String]> {
        self.fields.as_deref()
    }

    /// Caller filter.
    pub fn filter(&self) -> &Expression {
        &self.filter
    }

    /// Sort keys.
    pub fn sort(&self) -> &[SortBy] {
        &self.sort
    }

    /// Hits skipped.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Maximum hits.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Whether scores are reported.
    pub fn with_scores(&self) -> bool {
        self.with_scores
    }

    /// True for a partial projection.
    pub fn is_partial(&self) -> bool {
        self.fields.is_some()
    }

    pub(crate) fn restricted(&self, extra: Expression, limit: usize) -> Query {
        Query {
            filter: self.filter.clone().and(extra),
            limit,
            ..self.clone()
        }
    }
}

/// A projection waiting for its type.
#[derive(Debug, Clone)]
pub struct FieldSelect {
    fields: Vec<String>,
}

impl FieldSelect {
    /// The type the fields are read from.
    pub fn from(self, doc_type: impl Into<DocType>) -> QueryBuilder {
        QueryBuilder::new(doc_type.into(), Some(self.fields))
    }
}

/// Builder for [`Query`].
#[derive(Debug, Clone)]
#[must_use]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    fn new(doc_type: DocType, fields: Option<Vec<String>>) -> Self {
        Self {
            query: Query {
                doc_type,
                fields,
                filter: Expression::MatchAll,
                sort: Vec::new(),
                offset: 0,
                limit: DEFAULT_LIMIT,
                with_scores: false,
            },
        }
    }

    /// Adds a filter; repeated calls are combined with AND.
    pub fn where_(mut self, expr: Expression) -> Self {
        self.query.filter = self.query.filter.and(expr);
        self
    }

    /// Adds a sort key.
    pub fn sort_by(mut self, sort: SortBy) -> Self {
        self.query.sort.push(sort);
        self
    }

    /// Skips the first `offset` hits.
    pub fn offset(mut self, offset: usize) -> Self {
        self.query.offset = offset;
        self
    }

    /// Returns at most `limit` hits.
    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = limit;
        self
    }

    /// Requests scores.
    pub fn with_scores(mut self, with_scores: bool) -> Self {
        self.query.with_scores = with_scores;
        self
    }

    /// The finished query.
    #[must_use]
    pub fn build(self) -> Query {
        self.query
    }
}
