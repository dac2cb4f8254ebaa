//! Merge conflicts.

use crate::revision::{DocType, EntityId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a component could not be merged.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConflictType {
    /// Both sides changed an attribute to different values.
    ConflictingChange,
    /// One side removed what the other changed.
    DeletedWhileChanged,
    /// The target added a component referencing one the source removed.
    AddedInTargetAndDetachedInSource,
    /// The source added a component referencing one the target removed.
    AddedInSourceAndDetachedInTarget,
    /// The result would reference an absent or inactive component.
    HasInactiveReference,
    /// Reported by a custom rule.
    Custom(String),
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConflictingChange => f.write_str("CONFLICTING_CHANGE"),
            Self::DeletedWhileChanged => f.write_str("DELETED_WHILE_CHANGED"),
            Self::AddedInTargetAndDetachedInSource => {
                f.write_str("ADDED_IN_TARGET_AND_DETACHED_IN_SOURCE")
            }
            Self::AddedInSourceAndDetachedInTarget => {
                f.write_str("ADDED_IN_SOURCE_AND_DETACHED_IN_TARGET")
            }
            Self::HasInactiveReference => f.write_str("HAS_INACTIVE_REFERENCE"),
            Self::Custom(name) => write!(f, "CUSTOM({name})"),
        }
    }
}

/// One reason a merge was refused.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MergeConflict {
    /// The component in conflict.
    pub component_id: EntityId,
    /// Its type.
    pub component_type: DocType,
    /// Kind of conflict.
    pub conflict_type: ConflictType,
    /// The `(property, value)` at fault, when one attribute is.
    pub conflicting_attribute: Option<(String, String)>,
}

impl MergeConflict {
    /// A conflict without an attribute.
    pub fn new(component_id: EntityId, component_type: DocType, conflict_type: ConflictType) -> Self {
        Self {
            component_id,
            component_type,
            conflict_type,
            conflicting_attribute: None,
        }
    }

    /// Names the attribute at fault.
    #[must_use]
    pub fn with_attribute(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.conflicting_attribute = Some((property.into(), value.into()));
        self
    }
}

impl fmt::Display for MergeConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.conflict_type, self.component_type, self.component_id)?;
        if let Some((property, value)) = &self.conflicting_attribute {
            write!(f, " ({property}={value})")?;
        }
        Ok(())
    }
}
