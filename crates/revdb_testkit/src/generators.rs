//! Property-based test generators using proptest.
//!
//! Provides strategies for generating documents, change sets and scripts
//! of branch operations.

use proptest::prelude::*;
use revdb_core::{ChangeSet, Document, EntityId, FieldValue};

/// Strategy for generating valid entity ids from a small pool, so that
/// generated writes collide often.
pub fn entity_id_strategy(pool: usize) -> impl Strategy<Value = EntityId> {
    (0..pool.max(1)).prop_map(|i| EntityId::new(format!("E{i}")))
}

/// Strategy for generating valid branch names.
pub fn branch_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,15}").expect("Invalid regex")
}

/// Strategy for generating scalar field values.
pub fn field_value_strategy() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        "[a-z ]{0,12}".prop_map(FieldValue::from),
        any::<i64>().prop_map(FieldValue::from),
        any::<bool>().prop_map(FieldValue::from),
    ]
}

/// Strategy for generating `concept` documents with ids from `pool`.
pub fn document_strategy(pool: usize) -> impl Strategy<Value = Document> {
    (
        entity_id_strategy(pool),
        prop::collection::btree_map("[a-z]{1,6}", field_value_strategy(), 0..4),
    )
        .prop_map(|(id, fields)| {
            fields
                .into_iter()
                .fold(Document::new(id, "concept"), |doc, (name, value)| {
                    doc.with_field(name, value)
                })
        })
}

/// Strategy for generating change sets of distinct upserts.
pub fn change_set_strategy(pool: usize) -> impl Strategy<Value = ChangeSet> {
    prop::collection::vec(document_strategy(pool), 1..4).prop_map(|docs| {
        let mut seen = std::collections::BTreeSet::new();
        docs.into_iter()
            .filter(|d| seen.insert(d.id.clone()))
            .fold(ChangeSet::new(), ChangeSet::upsert)
    })
}

/// One step of a two-branch script.
#[derive(Debug, Clone)]
pub enum BranchOp {
    /// Set the `term` of an entity on `MAIN` (false) or the child (true).
    Put {
        /// Write to the child branch.
        child: bool,
        /// Entity number.
        entity: usize,
        /// New term.
        term: String,
    },
    /// Remove an entity if it is visible.
    Remove {
        /// Write to the child branch.
        child: bool,
        /// Entity number.
        entity: usize,
    },
    /// Checkpoint the repository.
    Flush,
    /// Drop the repository without flushing and reopen it.
    Restart,
}

/// Strategy for generating scripts of [`BranchOp`]s over `pool` entities.
pub fn branch_script_strategy(pool: usize, len: usize) -> impl Strategy<Value = Vec<BranchOp>> {
    let pool = pool.max(1);
    let op = prop_oneof![
        6 => (any::<bool>(), 0..pool, "[a-z]{1,6}")
            .prop_map(|(child, entity, term)| BranchOp::Put { child, entity, term }),
        2 => (any::<bool>(), 0..pool).prop_map(|(child, entity)| BranchOp::Remove { child, entity }),
        1 => Just(BranchOp::Flush),
        1 => Just(BranchOp::Restart),
    ];
    prop::collection::vec(op, 1..len.max(2))
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_change_sets_have_distinct_ids(set in change_set_strategy(3)) {
            let ids: std::collections::BTreeSet<_> = set.upserts().iter().map(|d| &d.id).collect();
            prop_assert_eq!(ids.len(), set.len());
            prop_assert!(!set.is_empty());
        }

        #[test]
        fn generated_names_are_valid_branch_names(name in branch_name_strategy()) {
            prop_assert!(revdb_core::BranchPath::main().child(&name).is_ok());
        }
    }
}
