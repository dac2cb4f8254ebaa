//! History compaction.

use crate::branch::{BranchManager, RevisionBranch, SegmentView};
use crate::error::{CoreError, CoreResult};
use crate::index::DocumentIndex;
use crate::revision::{EntityId, Revision, RevisionKey};
use crate::search::PinRegistry;
use crate::types::SegmentId;
use crate::wal::{DeleteTarget, WalOperation};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Which rows a purge removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PurgeStrategy {
    /// Every row in segments only this branch can see.
    All,
    /// Superseded rows except the newest predecessor of each entity.
    #[default]
    Latest,
    /// Every superseded row.
    History,
}

impl fmt::Display for PurgeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::All => "all",
            Self::Latest => "latest",
            Self::History => "history",
        })
    }
}

impl FromStr for PurgeStrategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "latest" => Ok(Self::Latest),
            "history" => Ok(Self::History),
            other => Err(CoreError::bad_request(format!("unknown purge strategy: {other}"))),
        }
    }
}

/// What a purge did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    /// Strategy used.
    pub strategy: PurgeStrategy,
    /// Rows created in the branch's segments.
    pub examined: usize,
    /// Rows removed.
    pub purged: usize,
    /// Durable batches written.
    pub batches: usize,
}

pub(crate) struct PurgeEnv<'a> {
    pub index: &'a DocumentIndex,
    pub branches: &'a BranchManager,
    pub pins: &'a PinRegistry,
    pub batch_size: usize,
    pub write: &'a dyn Fn(Vec<WalOperation>) -> CoreResult<()>,
    pub flush: &'a dyn Fn() -> CoreResult<()>,
}

/// Removes rows of `branch` selected by `strategy`.
///
/// A row is only removed when no other live branch and no open snapshot
/// can see it. Each batch is its own log batch followed by a flush, so a
/// failure leaves earlier batches purged and later ones untouched.
pub(crate) fn purge(env: &PurgeEnv<'_>, branch: &RevisionBranch, strategy: PurgeStrategy) -> CoreResult<PurgeReport> {
    let own: BTreeSet<SegmentId> = branch.own_segment_ids().into_iter().collect();
    let candidates = env.index.scan(|row| own.contains(&row.created.segment));

    let others: Vec<SegmentView> = env
        .branches
        .list(false)
        .iter()
        .filter(|b| b.path != branch.path)
        .map(RevisionBranch::view)
        .chain(env.pins.views())
        .collect();

    let view = branch.view();
    let selected = match strategy {
        PurgeStrategy::All => {
            let shared: BTreeSet<SegmentId> = others.iter().flat_map(|v| v.segments().collect::<Vec<_>>()).collect();
            candidates
                .iter()
                .filter(|r| !shared.contains(&r.created.segment))
                .collect::<Vec<_>>()
        }
        PurgeStrategy::History => candidates
            .iter()
            .filter(|r| superseded_in(&view, r))
            .collect(),
        PurgeStrategy::Latest => all_but_newest_superseded(&view, &candidates),
    };

    let mut doomed: Vec<RevisionKey> = selected
        .into_iter()
        .filter(|row| !others.iter().any(|v| v.is_visible(row)))
        .map(|row| row.key.clone())
        .collect();
    doomed.sort();

    let mut batches = 0;
    for chunk in doomed.chunks(env.batch_size.max(1)) {
        let ops = chunk
            .iter()
            .map(|key| WalOperation::Delete(DeleteTarget::Revision(key.clone())))
            .collect();
        (env.write)(ops)?;
        (env.flush)()?;
        batches += 1;
        debug!(branch = %branch.path, batch = batches, rows = chunk.len(), "purged batch");
    }

    let report = PurgeReport {
        strategy,
        examined: candidates.len(),
        purged: doomed.len(),
        batches,
    };
    info!(
        branch = %branch.path,
        %strategy,
        examined = report.examined,
        purged = report.purged,
        batches,
        "purge finished"
    );
    Ok(report)
}

fn superseded_in(view: &SegmentView, row: &Revision) -> bool {
    view.contains(row.created) && row.revised.iter().any(|s| view.contains(*s))
}

fn all_but_newest_superseded<'a>(view: &SegmentView, candidates: &'a [Revision]) -> Vec<&'a Revision> {
    let mut by_entity: BTreeMap<&EntityId, Vec<&Revision>> = BTreeMap::new();
    for row in candidates.iter().filter(|r| superseded_in(view, r)) {
        by_entity.entry(row.id()).or_default().push(row);
    }
    by_entity
        .into_values()
        .flat_map(|mut rows| {
            rows.sort_by_key(|r| r.created.timestamp);
            rows.pop();
            rows
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_parses_case_insensitively() {
        assert_eq!("ALL".parse::<PurgeStrategy>().unwrap(), PurgeStrategy::All);
        assert_eq!("history".parse::<PurgeStrategy>().unwrap(), PurgeStrategy::History);
        assert_eq!(PurgeStrategy::default(), PurgeStrategy::Latest);
        assert!("newest".parse::<PurgeStrategy>().is_err());
    }
}
