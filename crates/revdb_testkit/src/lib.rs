//! # RevDB Testkit
//!
//! Test utilities for RevDB.
//!
//! This crate provides:
//! - Repository fixtures that can be restarted over the same storage
//! - Document and change-set helpers
//! - A storage backend that simulates crashes mid-write
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use revdb_testkit::prelude::*;
//!
//! let repo = TestRepository::memory();
//! put(&repo, &BranchPath::main(), concept("E1", "heart"));
//! let repo = repo.restart();
//! assert_eq!(term(&repo, &BranchPath::main(), "E1").as_deref(), Some("heart"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use revdb_core::{BranchPath, ChangeSet, Document, EntityId, Repository};
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
