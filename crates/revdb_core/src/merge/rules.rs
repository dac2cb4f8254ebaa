//! Conflict rules.
//!
//! A rule inspects every entity changed on either side of a merge and
//! reports the conflicts it is responsible for. The engine runs all of its
//! rules and refuses the merge if any reported something.

use crate::branch::SegmentView;
use crate::index::{DocumentIndex, Mappings};
use crate::merge::conflict::{ConflictType, MergeConflict};
use crate::merge::three_way::{same, ClashKind, ThreeWay};
use crate::revision::{Document, EntityId};
use std::collections::BTreeMap;

/// One entity as seen by the merge base and both sides.
#[derive(Debug, Clone)]
pub struct EntityMerge {
    /// Entity id.
    pub id: EntityId,
    /// Visible in the common base.
    pub base: Option<Document>,
    /// Visible on the source.
    pub source: Option<Document>,
    /// Visible on the target.
    pub target: Option<Document>,
    /// The three-way result.
    pub result: ThreeWay,
}

impl EntityMerge {
    /// True if the source differs from the base.
    pub fn changed_in_source(&self) -> bool {
        !same(self.base.as_ref(), self.source.as_ref())
    }

    /// True if the target differs from the base.
    pub fn changed_in_target(&self) -> bool {
        !same(self.base.as_ref(), self.target.as_ref())
    }

    /// True if both sides differ from the base.
    pub fn changed_in_both(&self) -> bool {
        self.changed_in_source() && self.changed_in_target()
    }

    /// Added on the source only.
    pub fn added_in_source(&self) -> bool {
        self.base.is_none() && self.source.is_some() && self.target.is_none()
    }

    /// Added on the target only.
    pub fn added_in_target(&self) -> bool {
        self.base.is_none() && self.target.is_some() && self.source.is_none()
    }

    fn removed_in_source(&self) -> bool {
        self.base.is_some() && self.source.is_none()
    }

    fn removed_in_target(&self) -> bool {
        self.base.is_some() && self.target.is_none()
    }
}

/// What rules get to look at.
pub struct MergeContext<'a> {
    entities: &'a BTreeMap<EntityId, EntityMerge>,
    mappings: &'a Mappings,
    index: &'a DocumentIndex,
    target_view: &'a SegmentView,
}

impl<'a> MergeContext<'a> {
    pub(crate) fn new(
        entities: &'a BTreeMap<EntityId, EntityMerge>,
        mappings: &'a Mappings,
        index: &'a DocumentIndex,
        target_view: &'a SegmentView,
    ) -> Self {
        Self {
            entities,
            mappings,
            index,
            target_view,
        }
    }

    /// Entities changed on at least one side.
    pub fn entities(&self) -> impl Iterator<Item = &'a EntityMerge> {
        self.entities.values()
    }

    /// One changed entity.
    pub fn entity(&self, id: &EntityId) -> Option<&'a EntityMerge> {
        self.entities.get(id)
    }

    /// Type mappings in effect.
    pub fn mappings(&self) -> &'a Mappings {
        self.mappings
    }

    /// `id` as it would be after the merge.
    pub fn resolved(&self, id: &EntityId) -> Option<Document> {
        match self.entities.get(id) {
            Some(entity) => entity.result.merged.clone(),
            None => self
                .index
                .visible_row(id, self.target_view)
                .map(|row| row.document),
        }
    }

    /// `(field, referenced id)` pairs of a document's declared reference
    /// fields.
    pub fn references(&self, doc: &Document) -> Vec<(String, EntityId)> {
        self.mappings
            .reference_fields(&doc.doc_type)
            .iter()
            .filter_map(|field| doc.field(field).map(|value| (field, value)))
            .flat_map(|(field, value)| {
                value
                    .texts()
                    .map(|id| (field.clone(), EntityId::new(id)))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// The detached-reference conflict for `entity` referencing `target`,
    /// if one side added `entity` while the other removed `target`.
    fn detached(&self, entity: &EntityMerge, referenced: &EntityId) -> Option<ConflictType> {
        let other = self.entities.get(referenced)?;
        if entity.added_in_target() && other.removed_in_source() {
            Some(ConflictType::AddedInTargetAndDetachedInSource)
        } else if entity.added_in_source() && other.removed_in_target() {
            Some(ConflictType::AddedInSourceAndDetachedInTarget)
        } else {
            None
        }
    }
}

/// A check run against every merge.
pub trait ConflictRule: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Conflicts this rule finds.
    fn check(&self, ctx: &MergeContext<'_>) -> Vec<MergeConflict>;
}

/// Attributes changed to different values on both sides.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangedInBothRule;

impl ConflictRule for ChangedInBothRule {
    fn name(&self) -> &str {
        "changed-in-both"
    }

    fn check(&self, ctx: &MergeContext<'_>) -> Vec<MergeConflict> {
        ctx.entities()
            .flat_map(|entity| &entity.result.clashes)
            .filter_map(|clash| match &clash.kind {
                ClashKind::Attribute { property, value } => Some(
                    MergeConflict::new(
                        clash.component_id.clone(),
                        clash.component_type.clone(),
                        ConflictType::ConflictingChange,
                    )
                    .with_attribute(property.clone(), value.clone()),
                ),
                ClashKind::DeletedWhileChanged => None,
            })
            .collect()
    }
}

/// Removed on one side, changed on the other.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeletedWhileChangedRule;

impl ConflictRule for DeletedWhileChangedRule {
    fn name(&self) -> &str {
        "deleted-while-changed"
    }

    fn check(&self, ctx: &MergeContext<'_>) -> Vec<MergeConflict> {
        ctx.entities()
            .flat_map(|entity| &entity.result.clashes)
            .filter(|clash| clash.kind == ClashKind::DeletedWhileChanged)
            .map(|clash| {
                MergeConflict::new(
                    clash.component_id.clone(),
                    clash.component_type.clone(),
                    ConflictType::DeletedWhileChanged,
                )
            })
            .collect()
    }
}

/// A component added on one side references one removed on the other.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedReferenceRule;

impl ConflictRule for DetachedReferenceRule {
    fn name(&self) -> &str {
        "detached-reference"
    }

    fn check(&self, ctx: &MergeContext<'_>) -> Vec<MergeConflict> {
        let mut out = Vec::new();
        for entity in ctx.entities() {
            let Some(doc) = entity.source.as_ref().or(entity.target.as_ref()) else {
                continue;
            };
            for (field, referenced) in ctx.references(doc) {
                if let Some(kind) = ctx.detached(entity, &referenced) {
                    out.push(
                        MergeConflict::new(entity.id.clone(), doc.doc_type.clone(), kind)
                            .with_attribute(field, referenced.as_str()),
                    );
                }
            }
        }
        out
    }
}

/// The merged result references an absent or inactive component.
///
/// References already reported as detached are left to
/// [`DetachedReferenceRule`].
#[derive(Debug, Clone, Copy, Default)]
pub struct InactiveReferenceRule;

impl ConflictRule for InactiveReferenceRule {
    fn name(&self) -> &str {
        "inactive-reference"
    }

    fn check(&self, ctx: &MergeContext<'_>) -> Vec<MergeConflict> {
        let mut out = Vec::new();
        for entity in ctx.entities() {
            let Some(doc) = entity.result.merged.as_ref() else {
                continue;
            };
            if !doc.is_active() {
                continue;
            }
            for (field, referenced) in ctx.references(doc) {
                if ctx.detached(entity, &referenced).is_some() {
                    continue;
                }
                let live = ctx.resolved(&referenced).is_some_and(|r| r.is_active());
                if !live {
                    out.push(
                        MergeConflict::new(
                            entity.id.clone(),
                            doc.doc_type.clone(),
                            ConflictType::HasInactiveReference,
                        )
                        .with_attribute(field, referenced.as_str()),
                    );
                }
            }
        }
        out
    }
}

/// The rules every engine starts with.
pub fn default_rules() -> Vec<Box<dyn ConflictRule>> {
    vec![
        Box::new(ChangedInBothRule),
        Box::new(DeletedWhileChangedRule),
        Box::new(DetachedReferenceRule),
        Box::new(InactiveReferenceRule),
    ]
}
