//! # docmerge Testkit
//!
//! Test utilities for docmerge.
//!
//! This crate provides:
//! - Engine fixtures over the in-memory backend
//! - Deterministic, incompressible record payloads
//! - Property-based generators for ingestion plans
//! - A compaction harness that checks coverage and record preservation
//!
//! ## Usage
//!
//! ```rust
//! use docmerge_testkit::prelude::*;
//!
//! let test = TestEngine::new(DEFAULT_TEST_LIMIT);
//! let headers = test.ingest_aged(None, 2..=5, 16);
//! assert_eq!(headers.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
