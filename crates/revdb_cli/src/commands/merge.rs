//! Merge and rebase command implementation.

use super::{branch, emit, open, CliResult};
use revdb_core::{CoreError, MergeOutcome};
use serde::Serialize;
use std::path::Path;

/// What to run.
#[derive(Debug, Clone, Copy)]
pub enum Request<'a> {
    /// Merge or squash `source` into `target`.
    Merge {
        /// Source branch.
        source: &'a str,
        /// Target branch.
        target: &'a str,
        /// Squash into one commit.
        squash: bool,
    },
    /// Rebase `branch` onto `onto`, its parent when not given.
    Rebase {
        /// Branch to rebase.
        branch: &'a str,
        /// Parent to rebase onto.
        onto: Option<&'a str>,
    },
}

/// Merge result for output.
#[derive(Debug, Serialize)]
pub struct MergeSummary {
    /// Job id.
    pub job: String,
    /// Branch that received the changes.
    pub branch: String,
    /// Whether anything was written.
    pub changed: bool,
    /// Timestamp of the resolution commit, if one was made.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<u64>,
    /// Segment the branch writes to afterwards.
    pub segment: u32,
    /// Job states in order.
    pub states: Vec<String>,
}

impl From<&MergeOutcome> for MergeSummary {
    fn from(outcome: &MergeOutcome) -> Self {
        Self {
            job: outcome.job.id.to_string(),
            branch: outcome.branch.path.to_string(),
            changed: outcome.changed,
            commit: outcome.commit.as_ref().map(|c| c.timestamp.as_u64()),
            segment: outcome.branch.segment_id.as_u32(),
            states: outcome
                .job
                .transitions()
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// Runs the merge or rebase command.
pub fn run(path: &Path, request: Request<'_>, author: &str, comment: &str, format: &str) -> CliResult {
    let repo = open(path)?;
    let result = match request {
        Request::Merge {
            source,
            target,
            squash,
        } => repo.merge(&branch(source)?, &branch(target)?, squash, author, comment),
        Request::Rebase { branch: child, onto } => {
            let child = branch(child)?;
            let onto = match onto {
                Some(onto) => branch(onto)?,
                None => child.parent().ok_or("MAIN has no parent to rebase onto")?,
            };
            repo.rebase(&child, &onto, author, comment)
        }
    };
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(CoreError::MergeConflicts { conflicts }) => {
            emit(&conflicts, format, |conflicts| {
                println!("Merge refused, {} conflicts:", conflicts.len());
                for conflict in conflicts {
                    println!("  {conflict}");
                }
            })?;
            return Err(format!("{} merge conflicts", conflicts.len()).into());
        }
        Err(e) => return Err(e.into()),
    };
    repo.flush()?;

    let summary = MergeSummary::from(&outcome);
    emit(&summary, format, |summary| {
        if summary.changed {
            println!("{} updated, now writing to segment {}", summary.branch, summary.segment);
        } else {
            println!("{} already up to date", summary.branch);
        }
        if let Some(ts) = summary.commit {
            println!("Resolution commit at {ts}");
        }
    })
}
