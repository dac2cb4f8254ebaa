//! CLI command implementations.

pub mod branches;
pub mod compare;
pub mod dump_wal;
pub mod history;
pub mod inspect;
pub mod merge;
pub mod optimize;
pub mod purge;
pub mod reindex;
pub mod repos;

use revdb_core::{BranchPath, Config, Repository};
use serde::Serialize;
use std::path::Path;
use tracing::debug;

/// Result type shared by the commands.
pub type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Opens an existing repository.
pub fn open(path: &Path) -> CliResult<Repository> {
    if !path.exists() {
        return Err(format!("No repository found at {}", path.display()).into());
    }
    let repo = Repository::open_with_config(path, Config::new().create_if_missing(false))?;
    let recovered = repo.recovery();
    debug!(
        path = %path.display(),
        replayed_ops = recovered.replayed_ops,
        generation = repo.generation().as_u64(),
        "opened repository"
    );
    Ok(repo)
}

/// Parses a branch path argument.
pub fn branch(path: &str) -> CliResult<BranchPath> {
    Ok(BranchPath::parse(path)?)
}

/// Prints `value` as pretty JSON, or runs `text` otherwise.
pub fn emit<T: Serialize>(value: &T, format: &str, text: impl FnOnce(&T)) -> CliResult {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(value)?),
        _ => text(value),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_refuses_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = open(&dir.path().join("absent")).unwrap_err();
        assert!(err.to_string().contains("No repository found"));
    }

    #[test]
    fn open_reads_an_existing_repository() {
        let dir = tempfile::tempdir().unwrap();
        drop(Repository::open(dir.path()).unwrap());
        let repo = open(dir.path()).unwrap();
        assert_eq!(repo.branches().len(), 1);
    }

    #[test]
    fn branch_arguments_are_validated() {
        assert!(branch("MAIN/draft").is_ok());
        assert!(branch("draft//x").is_err());
    }
}
