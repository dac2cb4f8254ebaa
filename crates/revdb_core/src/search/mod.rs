//! Branch-scoped search.
//!
//! A caller [`Query`] names a type, a filter and paging. [`rewrite`] turns
//! it into a [`crate::index::SearchRequest`] that only matches rows
//! visible in one snapshot; [`RevisionSearcher`] runs it.

mod pin;
mod query;
mod rewriter;
mod searcher;

pub use pin::{PinRegistry, SnapshotPin};
pub use query::{FieldSelect, Query, QueryBuilder, DEFAULT_LIMIT};
pub use rewriter::{branch_filter, rewrite};
pub use searcher::RevisionSearcher;
