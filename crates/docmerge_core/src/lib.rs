//! # docmerge Core
//!
//! Chunked ingestion and leveled compaction of record documents.
//!
//! This crate provides:
//! - Level assignment from merge keys ([`assign_level`])
//! - Size-bounded chunking of record batches ([`AgedChunks`], [`SequenceChunks`])
//! - Ingestion into a [`docmerge_storage::DocumentBackend`] ([`Engine::add_document`])
//! - One-level-at-a-time compaction ([`Engine::merge_documents`])
//!
//! ## Flows
//!
//! A batch whose header declares `age` belongs to the aged flow and is
//! ordered by the `_AGE` generation of its records; otherwise it belongs
//! to the normal flow, ordered by `_SEQ`. A batch declaring `age = 1` is
//! the partition's table header document.
//!
//! ## Invariants
//!
//! - Every stored blob is smaller than `size_limit`
//! - Aged coverage is contiguous back to the table header
//! - `merge_level` never changes; `merged_level` rises one level per merge
//! - `merge_status` only moves from `initial` to `merged`

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod chunk;
mod config;
mod engine;
mod error;
mod flow;
mod ingest;
mod level;
mod merge;

pub use chunk::{AgedChunks, Chunk, SequenceChunks};
pub use config::{Config, MIN_SIZE_LIMIT, TOP_MERGE_LEVEL};
pub use engine::{CompactionReport, Engine};
pub use error::{CoreError, CoreResult};
pub use flow::{Flow, Span};
pub use ingest::TABLE_HEADER_AGE;
pub use level::assign_level;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
