//! Entity identity and document values.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Maximum length of an entity id.
pub const MAX_ID_LEN: usize = 128;

/// Identifier of an entity, stable across all of its revisions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Creates an id. Use [`EntityId::validate`] before writing it.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Checks the id is non-empty, at most 128 chars and free of whitespace
    /// and control characters.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BadRequest`] describing the violation.
    pub fn validate(&self) -> CoreResult<()> {
        if self.0.is_empty() || self.0.len() > MAX_ID_LEN {
            return Err(CoreError::bad_request(format!(
                "entity id must be 1..={MAX_ID_LEN} characters: {:?}",
                self.0
            )));
        }
        if self
            .0
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(CoreError::bad_request(format!(
                "entity id contains whitespace or control characters: {:?}",
                self.0
            )));
        }
        Ok(())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Type tag of a document, e.g. `concept` or `description`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocType(String);

impl DocType {
    /// Creates a type tag.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Checks the tag is a non-empty identifier of `[a-z0-9_]`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BadRequest`] if it is not.
    pub fn validate(&self) -> CoreResult<()> {
        let valid = !self.0.is_empty()
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
        if valid {
            Ok(())
        } else {
            Err(CoreError::bad_request(format!(
                "invalid document type: {:?}",
                self.0
            )))
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A field value.
///
/// The derived ordering (null < bool < int < text < list) is the sort
/// order used by queries.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FieldValue {
    /// Explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// UTF-8 text.
    Text(String),
    /// Ordered list of values.
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// The text value, if this is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The boolean value, if this is a boolean.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The integer value, if this is an integer.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Text values held by this value: itself, or the text members of a list.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        let items: Vec<&str> = match self {
            Self::Text(s) => vec![s.as_str()],
            Self::List(items) => items.iter().filter_map(Self::as_text).collect(),
            _ => Vec::new(),
        };
        items.into_iter()
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Text(s) => f.write_str(s),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl<T: Into<FieldValue>> From<Vec<T>> for FieldValue {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

/// One version of an entity as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Entity id.
    pub id: EntityId,
    /// Type tag.
    pub doc_type: DocType,
    /// Owning entity, by id only.
    pub container_id: Option<EntityId>,
    /// Field values by name.
    pub fields: BTreeMap<String, FieldValue>,
    /// Documents of nested types stored inside this one.
    pub nested: Vec<Document>,
}

impl Document {
    /// Creates a document with no fields.
    pub fn new(id: impl Into<EntityId>, doc_type: impl Into<DocType>) -> Self {
        Self {
            id: id.into(),
            doc_type: doc_type.into(),
            container_id: None,
            fields: BTreeMap::new(),
            nested: Vec::new(),
        }
    }

    /// Sets a field, builder style.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Sets the container id, builder style.
    #[must_use]
    pub fn with_container(mut self, container: impl Into<EntityId>) -> Self {
        self.container_id = Some(container.into());
        self
    }

    /// Adds a nested document, builder style.
    #[must_use]
    pub fn with_nested(mut self, nested: Document) -> Self {
        self.nested.push(nested);
        self
    }

    /// Sets a field in place.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Looks up a field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// False only when the document carries `active = false`.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.field("active").and_then(FieldValue::as_bool) != Some(false)
    }

    /// The id commits group this document under.
    #[must_use]
    pub fn container_key(&self) -> &EntityId {
        self.container_id.as_ref().unwrap_or(&self.id)
    }

    /// Ids of the nested documents, depth first.
    #[must_use]
    pub fn nested_ids(&self) -> Vec<&EntityId> {
        let mut out = Vec::new();
        for child in &self.nested {
            out.push(&child.id);
            out.extend(child.nested_ids());
        }
        out
    }

    /// Finds a nested document by id, searching depth first.
    #[must_use]
    pub fn find_nested(&self, id: &EntityId) -> Option<&Document> {
        self.nested
            .iter()
            .find_map(|child| if &child.id == id { Some(child) } else { child.find_nested(id) })
    }

    /// Content equality ignoring the order of nested documents.
    #[must_use]
    pub fn same_content(&self, other: &Document) -> bool {
        if self.id != other.id
            || self.doc_type != other.doc_type
            || self.container_id != other.container_id
            || self.fields != other.fields
            || self.nested.len() != other.nested.len()
        {
            return false;
        }
        self.nested.iter().all(|child| {
            other
                .nested
                .iter()
                .any(|o| o.id == child.id && o.same_content(child))
        })
    }

    /// Copy holding only the named fields.
    #[must_use]
    pub fn project(&self, names: &[String]) -> Document {
        Document {
            id: self.id.clone(),
            doc_type: self.doc_type.clone(),
            container_id: self.container_id.clone(),
            fields: self
                .fields
                .iter()
                .filter(|(k, _)| names.iter().any(|n| n == *k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            nested: Vec::new(),
        }
    }

    /// Validates ids and types, including nested documents.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BadRequest`] on the first invalid id or type.
    pub fn validate(&self) -> CoreResult<()> {
        self.id.validate()?;
        self.doc_type.validate()?;
        if let Some(container) = &self.container_id {
            container.validate()?;
        }
        for child in &self.nested {
            child.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_validation() {
        assert!(EntityId::new("138875005").validate().is_ok());
        assert!(EntityId::new("").validate().is_err());
        assert!(EntityId::new("has space").validate().is_err());
        assert!(EntityId::new("x".repeat(129)).validate().is_err());
    }

    #[test]
    fn doc_type_validation() {
        assert!(DocType::new("concept").validate().is_ok());
        assert!(DocType::new("Concept").validate().is_err());
        assert!(DocType::new("").validate().is_err());
    }

    #[test]
    fn container_key_falls_back_to_own_id() {
        let concept = Document::new("C1", "concept");
        assert_eq!(concept.container_key().as_str(), "C1");
        let rel = Document::new("R1", "relationship").with_container("C1");
        assert_eq!(rel.container_key().as_str(), "C1");
    }

    #[test]
    fn nested_lookup_and_ids() {
        let doc = Document::new("C1", "concept")
            .with_nested(Document::new("D1", "description").with_field("term", "Finding"))
            .with_nested(Document::new("D2", "description"));
        assert_eq!(doc.nested_ids().len(), 2);
        let d1 = doc.find_nested(&EntityId::new("D1")).unwrap();
        assert_eq!(d1.field("term").and_then(FieldValue::as_text), Some("Finding"));
        assert!(doc.find_nested(&EntityId::new("D9")).is_none());
    }

    #[test]
    fn same_content_ignores_nested_order() {
        let a = Document::new("C1", "concept")
            .with_nested(Document::new("D1", "description"))
            .with_nested(Document::new("D2", "description"));
        let b = Document::new("C1", "concept")
            .with_nested(Document::new("D2", "description"))
            .with_nested(Document::new("D1", "description"));
        assert!(a.same_content(&b));
        assert!(!a.same_content(&b.clone().with_field("active", false)));
    }

    #[test]
    fn activity_defaults_to_true() {
        let doc = Document::new("C1", "concept");
        assert!(doc.is_active());
        assert!(!doc.with_field("active", false).is_active());
    }

    #[test]
    fn projection_keeps_named_fields() {
        let doc = Document::new("C1", "concept")
            .with_field("a", 1i64)
            .with_field("b", 2i64)
            .with_nested(Document::new("D1", "description"));
        let projected = doc.project(&["b".to_string()]);
        assert_eq!(projected.fields.len(), 1);
        assert!(projected.nested.is_empty());
    }
}
