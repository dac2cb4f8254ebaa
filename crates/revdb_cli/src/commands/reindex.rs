//! Reindex command implementation.

use super::{emit, open, CliResult};
use revdb_core::{ReindexReport, Timestamp};
use std::path::Path;

/// Runs the reindex command.
pub fn run(path: &Path, from: &str, format: &str) -> CliResult {
    let from: Timestamp = from.parse()?;
    let repo = open(path)?;
    let report = repo.reindex(from)?;
    emit(&report, format, print_text_output)
}

fn print_text_output(report: &ReindexReport) {
    println!("Reindex from {}", report.from.to_rfc3339());
    println!("================");
    println!("  Revisions:  {}", report.revisions);
    println!("  Commits:    {}", report.commits);
    println!("  Branches:   {}", report.branches);
    println!("  Batches:    {}", report.batches);
}

#[cfg(test)]
mod tests {
    use super::*;
    use revdb_core::{BranchPath, ChangeSet, Document, Repository};

    #[test]
    fn rejects_unparseable_timestamps_before_opening() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(&dir.path().join("absent"), "last week", "json").unwrap_err();
        assert!(err.to_string().contains("invalid timestamp"));
    }

    #[test]
    fn reindexes_an_existing_repository() {
        let dir = tempfile::tempdir().unwrap();
        {
            let repo = Repository::open(dir.path()).unwrap();
            let doc = Document::new("E1", "concept").with_field("term", "heart");
            repo.commit(&BranchPath::main(), "t", "c", ChangeSet::new().upsert(doc))
                .unwrap();
        }
        run(dir.path(), "0", "json").unwrap();
        let repo = Repository::open(dir.path()).unwrap();
        assert_eq!(repo.recovery().replayed_ops, 0);
    }
}
