//! Branches command implementation.

use super::{emit, open, CliResult};
use revdb_core::{BranchPath, BranchState, RevisionBranch};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Branch listing entry.
#[derive(Debug, Serialize)]
pub struct BranchInfo {
    /// Full branch path.
    pub path: String,
    /// Lifecycle state.
    pub state: BranchState,
    /// Segment currently written to.
    pub segment: u32,
    /// Timestamp the branch was forked at.
    pub base: u64,
    /// Timestamp of the latest write.
    pub head: u64,
    /// Segments the branch reads, own and inherited.
    pub segments: usize,
    /// Nesting depth below `MAIN`.
    #[serde(skip)]
    pub depth: usize,
}

impl From<&RevisionBranch> for BranchInfo {
    fn from(branch: &RevisionBranch) -> Self {
        Self {
            path: branch.path.to_string(),
            state: branch.state,
            segment: branch.segment_id.as_u32(),
            base: branch.base_timestamp.as_u64(),
            head: branch.head_timestamp.as_u64(),
            segments: branch.all_segments().count(),
            depth: branch.path.depth(),
        }
    }
}

/// Runs the branches command.
pub fn run(path: &Path, all: bool, format: &str) -> CliResult {
    let repo = open(path)?;
    let branches = if all {
        repo.branches_including_deleted()
    } else {
        repo.branches()
    };
    let infos: Vec<BranchInfo> = tree_order(&branches).into_iter().map(BranchInfo::from).collect();
    emit(&infos, format, |infos| print_text_output(infos))
}

/// Depth-first order: every branch directly followed by its subtree.
fn tree_order(branches: &[RevisionBranch]) -> Vec<&RevisionBranch> {
    let known: BTreeSet<&BranchPath> = branches.iter().map(|b| &b.path).collect();
    let mut children: BTreeMap<&BranchPath, Vec<&RevisionBranch>> = BTreeMap::new();
    let mut roots = Vec::new();
    for branch in branches {
        match &branch.parent_path {
            Some(parent) if known.contains(parent) => children.entry(parent).or_default().push(branch),
            _ => roots.push(branch),
        }
    }

    let mut out = Vec::with_capacity(branches.len());
    let mut stack: Vec<&RevisionBranch> = roots.into_iter().rev().collect();
    while let Some(branch) = stack.pop() {
        out.push(branch);
        if let Some(kids) = children.get(&branch.path) {
            stack.extend(kids.iter().rev());
        }
    }
    out
}

fn print_text_output(infos: &[BranchInfo]) {
    for info in infos {
        let name = info.path.rsplit('/').next().unwrap_or(&info.path);
        print!("{:indent$}{name}", "", indent = info.depth * 2);
        print!("  segment={} head={}", info.segment, info.head);
        if info.state != BranchState::Active {
            print!("  [{}]", info.state);
        }
        println!();
    }
}
