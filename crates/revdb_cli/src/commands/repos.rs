//! Repos command implementation.

use super::{emit, CliResult};
use revdb_core::RepositoryDir;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// A repository found under the scanned directory.
#[derive(Debug, Serialize)]
pub struct RepoInfo {
    /// Directory name.
    pub name: String,
    /// Full path.
    pub path: PathBuf,
}

/// Runs the repos command: lists repositories directly under `root`.
pub fn run(root: &Path, format: &str) -> CliResult {
    let repos = scan(root)?;
    emit(&repos, format, |repos| {
        if repos.is_empty() {
            println!("No repositories under {}", root.display());
        }
        for repo in repos {
            println!("{}", repo.name);
        }
    })
}

fn scan(root: &Path) -> CliResult<Vec<RepoInfo>> {
    let mut repos = Vec::new();
    if RepositoryDir::is_repository(root) {
        repos.push(info(root));
    }
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if RepositoryDir::is_repository(&path) {
            repos.push(info(&path));
        }
    }
    repos.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(repos)
}

fn info(path: &Path) -> RepoInfo {
    RepoInfo {
        name: path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned()),
        path: path.to_path_buf(),
    }
}
