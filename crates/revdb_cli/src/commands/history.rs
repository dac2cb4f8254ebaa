//! History command implementation.

use super::{branch, emit, open, CliResult};
use revdb_core::{Commit, EntityId};
use std::path::Path;

/// Runs the history command.
pub fn run(path: &Path, branch_path: &str, entity: &str, format: &str) -> CliResult {
    let repo = open(path)?;
    let id = EntityId::new(entity);
    let commits = repo.history(&branch(branch_path)?, &id)?;
    emit(&commits, format, |commits| print_text_output(&id, commits))
}

fn print_text_output(id: &EntityId, commits: &[Commit]) {
    println!("History of {id} ({} commits)", commits.len());
    println!("================");
    for commit in commits {
        let kind = commit
            .kind_of(id)
            .map_or_else(|| "?".to_string(), |k| k.to_string());
        print!(
            "{} {:8} {} by {}",
            commit.timestamp.to_rfc3339(),
            kind,
            commit.branch,
            commit.author
        );
        if let Some(source) = &commit.merge_source {
            print!(" ({:?} from {})", source.kind, source.source);
        }
        if !commit.comment.is_empty() {
            print!(": {}", commit.comment);
        }
        println!();
    }
}
