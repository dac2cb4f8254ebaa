//! # revdb storage
//!
//! Byte stores underneath the revdb write-ahead log and document store.
//!
//! Backends never interpret what they hold. The log framing, the store
//! records and the commit metadata are all owned by `revdb_core`; this
//! crate only reads, appends, truncates and replaces bytes.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - shared in-memory buffer, cloned handles see the same bytes
//! - [`FileBackend`] - a single OS file
//!
//! ## Example
//!
//! ```rust
//! use revdb_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut log = InMemoryBackend::new();
//! let offset = log.append(b"begin").unwrap();
//! assert_eq!(log.read_at(offset, 5).unwrap(), b"begin");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
