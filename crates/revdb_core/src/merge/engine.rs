//! The merge and rebase state machine.

use crate::branch::{fold, BranchManager, BranchPath, RevisionBranch, SegmentView};
use crate::commit::{self, ChangeSet, Commit, CommitInfo, MergeKind, MergeSource};
use crate::error::{CoreError, CoreResult};
use crate::index::{DocumentIndex, Mappings};
use crate::lock::LockManager;
use crate::merge::conflict::MergeConflict;
use crate::merge::rules::{default_rules, ConflictRule, EntityMerge, MergeContext};
use crate::merge::three_way::merge_documents;
use crate::revision::EntityId;
use crate::types::TimestampClock;
use crate::wal::{IndexDocument, WalOperation};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Where a merge job is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergeState {
    /// Created, nothing done.
    Pending,
    /// Waiting for branch locks.
    Locking,
    /// Computing and checking changes.
    Applying,
    /// Refused with conflicts; nothing written.
    Conflicted,
    /// Written.
    Committed,
    /// Locks released.
    Unlocked,
}

impl fmt::Display for MergeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "PENDING",
            Self::Locking => "LOCKING",
            Self::Applying => "APPLYING",
            Self::Conflicted => "CONFLICTED",
            Self::Committed => "COMMITTED",
            Self::Unlocked => "UNLOCKED",
        })
    }
}

/// A merge, squash or rebase to run.
#[derive(Debug, Clone)]
pub struct MergeRequest {
    /// Where changes come from. For a rebase, the parent.
    pub source: BranchPath,
    /// Where changes go. For a rebase, the child.
    pub target: BranchPath,
    /// Merge, squash or rebase.
    pub kind: MergeKind,
    /// Author of any commit written.
    pub author: String,
    /// Message of any commit written.
    pub comment: String,
}

/// The record of one merge attempt.
#[derive(Debug, Clone)]
pub struct MergeJob {
    /// Job id, for correlating log lines.
    pub id: Uuid,
    /// What was asked.
    pub request: MergeRequest,
    transitions: Vec<MergeState>,
}

impl MergeJob {
    fn new(request: MergeRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            transitions: vec![MergeState::Pending],
        }
    }

    fn transition(&mut self, to: MergeState) {
        debug!(
            job = %self.id,
            source = %self.request.source,
            target = %self.request.target,
            from = %self.state(),
            %to,
            "merge transition"
        );
        self.transitions.push(to);
    }

    /// Current state.
    pub fn state(&self) -> MergeState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(MergeState::Pending)
    }

    /// Every state passed through, in order.
    pub fn transitions(&self) -> &[MergeState] {
        &self.transitions
    }
}

/// A finished merge.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// The target as it is now.
    pub branch: RevisionBranch,
    /// The commit written, if any.
    pub commit: Option<Commit>,
    /// False when the merge was a no-op.
    pub changed: bool,
    /// The job record.
    pub job: MergeJob,
}

/// Collaborators a merge needs.
pub(crate) struct MergeEnv<'a> {
    pub index: &'a DocumentIndex,
    pub branches: &'a BranchManager,
    pub locks: &'a LockManager,
    pub clock: &'a TimestampClock,
    pub mappings: &'a Mappings,
    pub write: &'a dyn Fn(Vec<WalOperation>) -> CoreResult<()>,
}

/// Runs merges under a configurable rule set.
pub struct MergeEngine {
    rules: Vec<Box<dyn ConflictRule>>,
}

impl Default for MergeEngine {
    fn default() -> Self {
        Self {
            rules: default_rules(),
        }
    }
}

impl fmt::Debug for MergeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeEngine")
            .field("rules", &self.rule_names())
            .finish()
    }
}

struct Applied {
    branch: RevisionBranch,
    commit: Option<Commit>,
    changed: bool,
}

impl MergeEngine {
    /// An engine with the built-in rules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule after the existing ones.
    #[must_use]
    pub fn with_rule(mut self, rule: impl ConflictRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    /// Names of the active rules.
    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Runs every rule; conflicts are deduplicated and sorted.
    pub fn detect(&self, ctx: &MergeContext<'_>) -> Vec<MergeConflict> {
        let mut found = BTreeSet::new();
        for rule in &self.rules {
            let conflicts = rule.check(ctx);
            if !conflicts.is_empty() {
                debug!(rule = rule.name(), count = conflicts.len(), "rule reported conflicts");
            }
            found.extend(conflicts);
        }
        found.into_iter().collect()
    }

    /// Locks both branches, applies the request and releases the locks.
    pub(crate) fn run(&self, env: &MergeEnv<'_>, request: MergeRequest) -> CoreResult<MergeOutcome> {
        let mut job = MergeJob::new(request);
        if job.request.source == job.request.target {
            return Err(CoreError::bad_request(format!(
                "cannot merge {} into itself",
                job.request.source
            )));
        }

        job.transition(MergeState::Locking);
        let guard = env
            .locks
            .lock_all(&[job.request.source.clone(), job.request.target.clone()])
            .inspect_err(|e| warn!(job = %job.id, error = %e, "merge could not lock branches"))?;

        job.transition(MergeState::Applying);
        let applied = self.apply(env, &mut job);
        drop(guard);
        job.transition(MergeState::Unlocked);

        let applied = applied?;
        info!(
            job = %job.id,
            kind = ?job.request.kind,
            source = %job.request.source,
            target = %job.request.target,
            changed = applied.changed,
            commit = ?applied.commit.as_ref().map(|c| c.timestamp),
            "merge finished"
        );
        Ok(MergeOutcome {
            branch: applied.branch,
            commit: applied.commit,
            changed: applied.changed,
            job,
        })
    }

    fn apply(&self, env: &MergeEnv<'_>, job: &mut MergeJob) -> CoreResult<Applied> {
        let request = job.request.clone();
        let source = env.branches.get(&request.source)?;
        let target = env.branches.get(&request.target)?;
        target.ensure_writable()?;
        if request.kind == MergeKind::Rebase {
            source.ensure_writable()?;
            if target.parent_path.as_ref() != Some(&source.path) {
                return Err(CoreError::bad_request(format!(
                    "{} can only be rebased onto its direct parent, not {}",
                    target.path, source.path
                )));
            }
        }

        let source_view = source.view();
        let target_view = target.view();
        let base_view = source_view.intersect(&target_view);
        let entities = diff(env.index, &base_view, &source_view, &target_view);

        let ctx = MergeContext::new(&entities, env.mappings, env.index, &target_view);
        let conflicts = self.detect(&ctx);
        if !conflicts.is_empty() {
            job.transition(MergeState::Conflicted);
            warn!(job = %job.id, conflicts = conflicts.len(), "merge refused");
            return Err(CoreError::MergeConflicts { conflicts });
        }

        let info = CommitInfo {
            author: request.author.clone(),
            comment: request.comment.clone(),
            merge_source: Some(MergeSource {
                source: source.path.clone(),
                kind: request.kind,
            }),
        };
        let applied = match request.kind {
            MergeKind::Merge => merge(env, &source, &target, &entities, info)?,
            MergeKind::Squash => squash(env, &target, &entities, info)?,
            MergeKind::Rebase => rebase(env, &target, &entities, info)?,
        };
        if applied.changed {
            job.transition(MergeState::Committed);
        }
        Ok(applied)
    }
}

/// Entities touched on either side since the base, with their three-way
/// merge. Entities that ended up equal to the base on both sides are left
/// out.
fn diff(
    index: &DocumentIndex,
    base: &SegmentView,
    source: &SegmentView,
    target: &SegmentView,
) -> BTreeMap<EntityId, EntityMerge> {
    let touched_since_base = |view: &SegmentView| -> BTreeSet<EntityId> {
        index
            .commits_visible(view)
            .iter()
            .filter(|c| !base.contains(c.stamp()))
            .flat_map(|c| c.touched_ids().into_iter().cloned().collect::<Vec<_>>())
            .collect()
    };
    let mut ids = touched_since_base(source);
    ids.extend(touched_since_base(target));

    let doc = |id: &EntityId, view: &SegmentView| index.visible_row(id, view).map(|r| r.document);
    let mut out = BTreeMap::new();
    for id in ids {
        let entity = {
            let base_doc = doc(&id, base);
            let source_doc = doc(&id, source);
            let target_doc = doc(&id, target);
            let result = merge_documents(base_doc.as_ref(), source_doc.as_ref(), target_doc.as_ref());
            EntityMerge {
                id: id.clone(),
                base: base_doc,
                source: source_doc,
                target: target_doc,
                result,
            }
        };
        if entity.changed_in_source() || entity.changed_in_target() {
            out.insert(id, entity);
        }
    }
    out
}

/// Change set superseding both sides of entities changed on both.
fn resolutions(entities: &BTreeMap<EntityId, EntityMerge>) -> ChangeSet {
    entities
        .values()
        .filter(|e| e.changed_in_both())
        .fold(ChangeSet::new(), |set, e| match &e.result.merged {
            Some(doc) => set.upsert(doc.clone()),
            None => set,
        })
}

fn write_branch(env: &MergeEnv<'_>, mut ops: Vec<WalOperation>, branch: &RevisionBranch) -> CoreResult<()> {
    ops.push(WalOperation::Index(IndexDocument::Branch(branch.clone())));
    (env.write)(ops)
}

fn merge(
    env: &MergeEnv<'_>,
    source: &RevisionBranch,
    target: &RevisionBranch,
    entities: &BTreeMap<EntityId, EntityMerge>,
    info: CommitInfo,
) -> CoreResult<Applied> {
    let Some(folded) = fold(target, source) else {
        debug!(source = %source.path, target = %target.path, "target already covers source");
        return Ok(Applied {
            branch: target.clone(),
            commit: None,
            changed: false,
        });
    };

    let changes = resolutions(entities);
    let planned = if changes.is_empty() {
        None
    } else {
        commit::plan(env.index, env.mappings, &folded, env.clock.next(), info, &changes)?
    };
    match planned {
        Some(planned) => {
            (env.write)(planned.ops)?;
            Ok(Applied {
                branch: planned.branch,
                commit: Some(planned.commit),
                changed: true,
            })
        }
        None => {
            write_branch(env, Vec::new(), &folded)?;
            Ok(Applied {
                branch: folded,
                commit: None,
                changed: true,
            })
        }
    }
}

fn squash(
    env: &MergeEnv<'_>,
    target: &RevisionBranch,
    entities: &BTreeMap<EntityId, EntityMerge>,
    info: CommitInfo,
) -> CoreResult<Applied> {
    let changes = entities
        .values()
        .filter(|e| e.changed_in_source())
        .fold(ChangeSet::new(), |set, e| match (&e.result.merged, &e.target) {
            (Some(doc), _) => set.upsert(doc.clone()),
            (None, Some(_)) => set.remove(e.id.clone()),
            (None, None) => set,
        });
    if changes.is_empty() {
        return Ok(Applied {
            branch: target.clone(),
            commit: None,
            changed: false,
        });
    }
    match commit::plan(env.index, env.mappings, target, env.clock.next(), info, &changes)? {
        Some(planned) => {
            (env.write)(planned.ops)?;
            Ok(Applied {
                branch: planned.branch,
                commit: Some(planned.commit),
                changed: true,
            })
        }
        None => Ok(Applied {
            branch: target.clone(),
            commit: None,
            changed: false,
        }),
    }
}

fn rebase(
    env: &MergeEnv<'_>,
    child: &RevisionBranch,
    entities: &BTreeMap<EntityId, EntityMerge>,
    info: CommitInfo,
) -> CoreResult<Applied> {
    let Some(rebased) = env.branches.plan_rebase(&child.path)? else {
        debug!(branch = %child.path, "parent has not moved, nothing to rebase");
        return Ok(Applied {
            branch: child.clone(),
            commit: None,
            changed: false,
        });
    };

    let parent_op = WalOperation::Index(IndexDocument::Branch(rebased.parent.clone()));
    let changes = resolutions(entities);
    let planned = if changes.is_empty() {
        None
    } else {
        commit::plan(env.index, env.mappings, &rebased.child, env.clock.next(), info, &changes)?
    };
    match planned {
        Some(planned) => {
            let mut ops = vec![parent_op];
            ops.extend(planned.ops);
            (env.write)(ops)?;
            Ok(Applied {
                branch: planned.branch,
                commit: Some(planned.commit),
                changed: true,
            })
        }
        None => {
            write_branch(env, vec![parent_op], &rebased.child)?;
            Ok(Applied {
                branch: rebased.child,
                commit: None,
                changed: true,
            })
        }
    }
}
