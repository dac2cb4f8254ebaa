//! Revision document model.
//!
//! A [`Document`] is the caller-facing value of an entity. Every change
//! to a document writes a new immutable [`Revision`] row; the row it
//! replaces is never edited, it only gains a [`RevisionStamp`] in its
//! `revised` set recording which segment superseded it and when.
//!
//! Containment is lookup-only: a document names its container by id and
//! never holds a reference to it. Nested documents (for example the
//! descriptions of a concept) are stored inline in their container's row.

mod document;
mod row;

pub use document::{DocType, Document, EntityId, FieldValue};
pub use row::{Revision, RevisionHash, RevisionKey, RevisionStamp};
