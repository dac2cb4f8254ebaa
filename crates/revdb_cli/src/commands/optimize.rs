//! Optimize command implementation.

use super::{emit, open, CliResult};
use revdb_core::index::OptimizeReport;
use std::path::Path;

/// Runs the optimize command.
pub fn run(path: &Path, format: &str) -> CliResult {
    let repo = open(path)?;
    let report = repo.optimize()?;
    emit(&report, format, |report| {
        let saved = report.bytes_before.saturating_sub(report.bytes_after);
        println!("Store rewritten with {} records", report.records);
        println!("  Before:  {} bytes", report.bytes_before);
        println!("  After:   {} bytes", report.bytes_after);
        println!("  Saved:   {saved} bytes");
    })
}
