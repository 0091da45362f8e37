//! Error types for docmerge core.

use docmerge_storage::DocRef;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Fatal errors of the engine.
///
/// Expected planning outcomes (missing leader, unmerged dependency, coverage
/// gap) are not errors; `merge_documents` reports them as `Ok(false)`.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] docmerge_storage::StorageError),

    /// Record codec error.
    #[error("codec error: {0}")]
    Codec(#[from] docmerge_codec::CodecError),

    /// A blob would reach the size ceiling.
    #[error("document of {size} bytes reaches the size limit of {limit} bytes")]
    DocumentTooLarge {
        /// Compressed size of the rejected blob.
        size: usize,
        /// Configured ceiling.
        limit: usize,
    },

    /// A record's `_AGE` falls outside the declared range.
    #[error("record age {age} outside declared range {declared_start}..={declared_end}")]
    AgeOutOfRange {
        /// The offending age.
        age: u64,
        /// Declared `age`.
        declared_start: u64,
        /// Declared `end_age`.
        declared_end: u64,
    },

    /// A header is missing what its flow requires.
    #[error("malformed header: {message}")]
    MalformedHeader {
        /// What is missing or inconsistent.
        message: String,
    },

    /// A record is missing or misuses a reserved field.
    #[error("malformed record: {message}")]
    MalformedRecord {
        /// What is wrong with the record.
        message: String,
    },

    /// The operation is not valid in this state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of the problem.
        message: String,
    },

    /// The engine configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// A referenced document does not exist.
    #[error("document not found: {doc_ref}")]
    DocumentNotFound {
        /// The missing reference.
        doc_ref: DocRef,
    },
}

impl CoreError {
    /// Creates a malformed header error.
    pub fn malformed_header(message: impl Into<String>) -> Self {
        Self::MalformedHeader {
            message: message.into(),
        }
    }

    /// Creates a malformed record error.
    pub fn malformed_record(message: impl Into<String>) -> Self {
        Self::MalformedRecord {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}
