//! Purge command implementation.

use super::{branch, emit, open, CliResult};
use revdb_core::{PurgeReport, PurgeStrategy};
use std::path::Path;

/// Runs the purge command.
pub fn run(path: &Path, branch_path: &str, strategy: &str, format: &str) -> CliResult {
    let strategy: PurgeStrategy = strategy.parse()?;
    let repo = open(path)?;
    let report = repo.purge(&branch(branch_path)?, strategy)?;
    emit(&report, format, print_text_output)
}

fn print_text_output(report: &PurgeReport) {
    println!("Purge ({})", report.strategy);
    println!("================");
    println!("  Rows examined:   {}", report.examined);
    println!("  Rows purged:     {}", report.purged);
    println!("  Batches:         {}", report.batches);
}
