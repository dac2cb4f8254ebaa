//! Compare command implementation.

use super::{branch, emit, open, CliResult};
use revdb_core::{CompareCategory, CompareDetail, RevisionCompareResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

const CATEGORIES: [CompareCategory; 3] = [
    CompareCategory::New,
    CompareCategory::Changed,
    CompareCategory::Deleted,
];

/// Compare summary for output.
#[derive(Debug, Serialize)]
pub struct CompareSummary {
    /// Base branch.
    pub base: String,
    /// Compared branch.
    pub compare: String,
    /// Ids sampled per category.
    pub limit: usize,
    /// Details per document type.
    pub types: BTreeMap<String, CompareDetail>,
}

impl From<&RevisionCompareResult> for CompareSummary {
    fn from(result: &RevisionCompareResult) -> Self {
        Self {
            base: result.base().branch().to_string(),
            compare: result.compare().branch().to_string(),
            limit: result.limit(),
            types: result
                .details()
                .iter()
                .map(|(t, d)| (t.to_string(), d.clone()))
                .collect(),
        }
    }
}

/// Runs the compare command.
pub fn run(
    path: &Path,
    base: &str,
    compare: &str,
    limit: Option<usize>,
    format: &str,
) -> CliResult {
    let repo = open(path)?;
    let result = repo.compare(&branch(base)?, &branch(compare)?, limit)?;
    let summary = CompareSummary::from(&result);
    emit(&summary, format, print_text_output)
}

fn print_text_output(summary: &CompareSummary) {
    println!("{} compared to {}", summary.compare, summary.base);
    println!("================");
    if summary.types.is_empty() {
        println!("No differences.");
        return;
    }
    for (doc_type, detail) in &summary.types {
        println!("{doc_type}:");
        for category in CATEGORIES {
            let total = detail.total(category);
            if total == 0 {
                continue;
            }
            let ids: Vec<String> = detail.ids(category).iter().map(ToString::to_string).collect();
            let more = if total > ids.len() { ", ..." } else { "" };
            let name = category.to_string();
            println!("  {name:8} {total:6}  {}{more}", ids.join(", "));
        }
    }
}
