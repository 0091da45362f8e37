//! # docmerge Storage
//!
//! Document backend trait, header model and an in-memory backend.
//!
//! A backend stores documents: one [`Header`] plus one opaque compressed
//! blob each. Backends never decode blobs; the compaction engine in
//! `docmerge_core` owns the record format.
//!
//! ## Design Principles
//!
//! - The partition is passed explicitly on every call as a [`TableContext`]
//! - Header fields are a fixed struct; partial updates use [`HeaderPatch`]
//!   with explicit [`FieldUpdate::Delete`] for removal
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and simulation
//!
//! ## Example
//!
//! ```rust
//! use docmerge_storage::{DocumentBackend, Header, InMemoryBackend, StreamQuery, TableContext};
//!
//! let backend = InMemoryBackend::new();
//! let ctx = TableContext::new("events", "clicks");
//! backend.prepare_table(&ctx).unwrap();
//!
//! let mut header = Header::for_table(&ctx);
//! header.sort_key = "0001".into();
//! let (doc_ref, _) = backend.add_document(&ctx, header, vec![1, 2, 3]).unwrap();
//!
//! let refs: Vec<_> = backend
//!     .get_stream_by_sort_key(&ctx, &StreamQuery::all())
//!     .unwrap()
//!     .collect();
//! assert_eq!(refs, vec![doc_ref]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod header;
mod memory;

pub use backend::{DocRef, DocStream, DocumentBackend, StreamQuery};
pub use error::{StorageError, StorageResult};
pub use header::{
    FieldUpdate, Header, HeaderPatch, MergeStatus, TableContext, TableCounters,
    TABLE_HEADER_LEVEL,
};
pub use memory::InMemoryBackend;
