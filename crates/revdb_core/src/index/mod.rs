//! Document index: the search backend every revision, commit and branch
//! value lives in.
//!
//! The index is not aware of branches. Callers scope searches with
//! [`Expression::Stamp`] clauses built from a segment view; see
//! `crate::search` for the rewriter that does so.

mod backend;
mod mapping;
mod query;

pub use backend::{DocumentIndex, IndexStats, OptimizeReport};
pub use mapping::Mappings;
pub use query::{fields, Expression, Hits, Order, SearchRequest, SortBy, StampField, Target};
pub(crate) use query::MatchContext;
