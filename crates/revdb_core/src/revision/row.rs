//! Immutable revision rows.

use crate::codec;
use crate::error::CoreResult;
use crate::revision::{DocType, Document, EntityId};
use crate::types::{SegmentId, Timestamp};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Where and when a row was created or superseded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RevisionStamp {
    /// Segment the write went into.
    pub segment: SegmentId,
    /// Commit timestamp of the write.
    pub timestamp: Timestamp,
}

impl RevisionStamp {
    /// Creates a stamp.
    #[must_use]
    pub const fn new(segment: SegmentId, timestamp: Timestamp) -> Self {
        Self { segment, timestamp }
    }
}

impl fmt::Display for RevisionStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.segment, self.timestamp)
    }
}

/// Hex SHA-256 of a row's content and creation stamp.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionHash(String);

impl RevisionHash {
    /// Returns the hash as hex.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for display.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for RevisionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a revision row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RevisionKey {
    /// The entity the row is a version of.
    pub entity_id: EntityId,
    /// Content hash distinguishing versions of the entity.
    pub hash: RevisionHash,
}

impl fmt::Display for RevisionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_id, self.hash.short())
    }
}

/// One immutable version of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    /// Row identity.
    pub key: RevisionKey,
    /// Entity content.
    pub document: Document,
    /// The write that created the row.
    pub created: RevisionStamp,
    /// Writes that superseded the row. Empty while the row is current
    /// everywhere it is visible; more than one entry when branches that
    /// share the row replaced it independently.
    pub revised: Vec<RevisionStamp>,
}

impl Revision {
    /// Creates a fresh row for `document` written at `created`.
    ///
    /// # Errors
    ///
    /// Fails if the document cannot be encoded for hashing.
    pub fn new(document: Document, created: RevisionStamp) -> CoreResult<Self> {
        let hash = Self::compute_hash(&document, created)?;
        Ok(Self {
            key: RevisionKey {
                entity_id: document.id.clone(),
                hash,
            },
            document,
            created,
            revised: Vec::new(),
        })
    }

    fn compute_hash(document: &Document, created: RevisionStamp) -> CoreResult<RevisionHash> {
        let bytes = codec::encode(&(document, created))?;
        Ok(RevisionHash(hex::encode(Sha256::digest(&bytes))))
    }

    /// Entity id of the row.
    #[must_use]
    pub fn id(&self) -> &EntityId {
        &self.key.entity_id
    }

    /// Document type of the row.
    #[must_use]
    pub fn doc_type(&self) -> &DocType {
        &self.document.doc_type
    }

    /// Records that the row was superseded at `stamp`. Idempotent.
    pub fn mark_revised(&mut self, stamp: RevisionStamp) {
        if !self.revised.contains(&stamp) {
            self.revised.push(stamp);
            self.revised.sort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(seg: u32, ts: u64) -> RevisionStamp {
        RevisionStamp::new(SegmentId::new(seg), Timestamp::new(ts))
    }

    #[test]
    fn hash_depends_on_content_and_stamp() {
        let doc = Document::new("E1", "concept").with_field("field1", "field1");
        let a = Revision::new(doc.clone(), stamp(0, 10)).unwrap();
        let b = Revision::new(doc.clone(), stamp(0, 10)).unwrap();
        let c = Revision::new(doc.clone(), stamp(1, 10)).unwrap();
        let d = Revision::new(doc.with_field("field1", "changed"), stamp(0, 10)).unwrap();
        assert_eq!(a.key, b.key);
        assert_ne!(a.key.hash, c.key.hash);
        assert_ne!(a.key.hash, d.key.hash);
        assert_eq!(a.key.hash.as_str().len(), 64);
    }

    #[test]
    fn mark_revised_is_idempotent() {
        let mut row = Revision::new(Document::new("E1", "concept"), stamp(0, 1)).unwrap();
        row.mark_revised(stamp(2, 9));
        row.mark_revised(stamp(1, 5));
        row.mark_revised(stamp(2, 9));
        assert_eq!(row.revised, vec![stamp(1, 5), stamp(2, 9)]);
    }
}
