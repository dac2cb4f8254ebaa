//! Type mappings: which types nest inside which containers, and which
//! fields reference other components.

use crate::revision::DocType;
use std::collections::BTreeMap;

/// Structural metadata about document types.
#[derive(Debug, Clone, Default)]
pub struct Mappings {
    nested: BTreeMap<DocType, DocType>,
    references: BTreeMap<DocType, Vec<String>>,
}

impl Mappings {
    /// Empty mappings: every type is top-level with no references.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `nested` as stored inside documents of `container`.
    #[must_use]
    pub fn nested(mut self, nested: impl Into<DocType>, container: impl Into<DocType>) -> Self {
        self.nested.insert(nested.into(), container.into());
        self
    }

    /// Declares `field` of `doc_type` as holding component ids.
    #[must_use]
    pub fn reference(mut self, doc_type: impl Into<DocType>, field: impl Into<String>) -> Self {
        let fields = self.references.entry(doc_type.into()).or_default();
        let field = field.into();
        if !fields.contains(&field) {
            fields.push(field);
        }
        self
    }

    /// Container type of a nested type.
    #[must_use]
    pub fn container_of(&self, doc_type: &DocType) -> Option<&DocType> {
        self.nested.get(doc_type)
    }

    /// True if `doc_type` is stored inside a container.
    #[must_use]
    pub fn is_nested(&self, doc_type: &DocType) -> bool {
        self.nested.contains_key(doc_type)
    }

    /// Reference fields of `doc_type`.
    #[must_use]
    pub fn reference_fields(&self, doc_type: &DocType) -> &[String] {
        self.references.get(doc_type).map_or(&[], Vec::as_slice)
    }

    /// Folds another set of mappings into this one.
    pub fn merge(&mut self, other: Mappings) {
        self.nested.extend(other.nested);
        for (doc_type, fields) in other.references {
            let existing = self.references.entry(doc_type).or_default();
            for field in fields {
                if !existing.contains(&field) {
                    existing.push(field);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_and_reference_lookup() {
        let mappings = Mappings::new()
            .nested("description", "concept")
            .reference("relationship", "destination")
            .reference("relationship", "destination");
        let description = DocType::new("description");
        assert!(mappings.is_nested(&description));
        assert_eq!(mappings.container_of(&description).unwrap().as_str(), "concept");
        assert_eq!(
            mappings.reference_fields(&DocType::new("relationship")),
            ["destination".to_string()]
        );
        assert!(mappings.reference_fields(&DocType::new("concept")).is_empty());
    }

    #[test]
    fn merge_accumulates() {
        let mut base = Mappings::new().reference("relationship", "source");
        base.merge(Mappings::new().reference("relationship", "destination").nested("member", "refset"));
        assert_eq!(base.reference_fields(&DocType::new("relationship")).len(), 2);
        assert!(base.is_nested(&DocType::new("member")));
    }
}
