//! Branch compare.

mod result;

pub use result::{compare, CompareCategory, CompareDetail, RevisionCompareResult};
