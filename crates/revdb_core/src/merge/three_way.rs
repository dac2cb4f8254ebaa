//! Three-way document merge.

use crate::index::fields;
use crate::revision::{DocType, Document, EntityId, FieldValue};
use std::collections::BTreeSet;

/// What could not be merged automatically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClashKind {
    /// Both sides set `property`; `value` is the source's.
    Attribute {
        /// Field name.
        property: String,
        /// Value on the source side.
        value: String,
    },
    /// One side removed the component, the other changed it.
    DeletedWhileChanged,
}

/// A component-level clash found while merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clash {
    /// The clashing component, possibly nested.
    pub component_id: EntityId,
    /// Its type.
    pub component_type: DocType,
    /// What clashed.
    pub kind: ClashKind,
}

/// Result of merging one entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThreeWay {
    /// The merged document, `None` when the entity ends up removed. When
    /// there are clashes the target side wins here.
    pub merged: Option<Document>,
    /// Everything that needs a decision.
    pub clashes: Vec<Clash>,
}

/// True when both are absent or have the same content.
pub(crate) fn same(a: Option<&Document>, b: Option<&Document>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.same_content(b),
        _ => false,
    }
}

/// Merges `source` and `target`, both derived from `base`.
///
/// A side equal to the base yields the other side. Otherwise fields and
/// nested documents are merged one by one; only changes to the same field
/// or the same nested document clash.
pub fn merge_documents(
    base: Option<&Document>,
    source: Option<&Document>,
    target: Option<&Document>,
) -> ThreeWay {
    let mut clashes = Vec::new();
    let merged = merge_into(base, source, target, &mut clashes);
    ThreeWay { merged, clashes }
}

fn merge_into(
    base: Option<&Document>,
    source: Option<&Document>,
    target: Option<&Document>,
    clashes: &mut Vec<Clash>,
) -> Option<Document> {
    if same(source, target) || same(source, base) {
        return target.cloned();
    }
    if same(target, base) {
        return source.cloned();
    }
    let (source, target) = match (source, target) {
        (Some(s), Some(t)) => (s, t),
        (Some(doc), None) | (None, Some(doc)) => {
            clashes.push(Clash {
                component_id: doc.id.clone(),
                component_type: doc.doc_type.clone(),
                kind: ClashKind::DeletedWhileChanged,
            });
            return target.cloned();
        }
        (None, None) => return None,
    };

    let mut merged = target.clone();
    let clash = |property: &str, value: String| Clash {
        component_id: target.id.clone(),
        component_type: target.doc_type.clone(),
        kind: ClashKind::Attribute {
            property: property.to_string(),
            value,
        },
    };

    let base_container = base.and_then(|b| b.container_id.as_ref());
    match pick(base_container, source.container_id.as_ref(), target.container_id.as_ref()) {
        Some(value) => merged.container_id = value.cloned(),
        None => clashes.push(clash(
            fields::CONTAINER,
            source.container_id.as_ref().map_or_else(String::new, ToString::to_string),
        )),
    }

    let names: BTreeSet<&String> = source.fields.keys().chain(target.fields.keys()).collect();
    for name in names {
        let base_value = base.and_then(|b| b.field(name));
        match pick(base_value, source.field(name), target.field(name)) {
            Some(Some(value)) => {
                merged.fields.insert(name.clone(), value.clone());
            }
            Some(None) => {
                merged.fields.remove(name);
            }
            None => clashes.push(clash(
                name,
                source.field(name).map_or_else(String::new, FieldValue::to_string),
            )),
        }
    }

    let mut ids: Vec<&EntityId> = target.nested.iter().map(|d| &d.id).collect();
    for doc in &source.nested {
        if !ids.contains(&&doc.id) {
            ids.push(&doc.id);
        }
    }
    merged.nested = ids
        .into_iter()
        .filter_map(|id| {
            merge_into(
                base.and_then(|b| direct_child(b, id)),
                direct_child(source, id),
                direct_child(target, id),
                clashes,
            )
        })
        .collect();
    Some(merged)
}

fn pick<'a, T: PartialEq>(base: Option<&'a T>, source: Option<&'a T>, target: Option<&'a T>) -> Option<Option<&'a T>> {
    if source == target || source == base {
        Some(target)
    } else if target == base {
        Some(source)
    } else {
        None
    }
}

fn direct_child<'a>(doc: &'a Document, id: &EntityId) -> Option<&'a Document> {
    doc.nested.iter().find(|d| &d.id == id)
}
