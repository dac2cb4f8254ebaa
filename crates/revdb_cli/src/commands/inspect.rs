//! Inspect command implementation.

use super::{emit, open, CliResult};
use revdb_core::RepositoryStats;
use std::path::Path;

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> CliResult {
    let repo = open(path)?;
    let stats = repo.stats()?;
    emit(&stats, format, |stats| print_text_output(path, stats))
}

fn print_text_output(path: &Path, stats: &RepositoryStats) {
    println!("RevDB Repository: {}", path.display());
    println!("================");
    println!();
    println!("Storage:");
    println!("  WAL size:        {} bytes", stats.wal_bytes);
    println!("  Store size:      {} bytes", stats.index.store_bytes);
    println!("  Generation:      {}", stats.generation);
    println!("  Recovered ops:   {}", stats.recovered_ops);
    println!();
    println!("Content:");
    println!("  Entities:        {}", stats.index.entities);
    println!("  Revision rows:   {}", stats.index.revisions);
    println!("  Commits:         {}", stats.index.commits);
    println!("  Branches:        {} ({} live)", stats.index.branches, stats.live_branches);
}
