//! Error types for storage operations.

use crate::backend::DocRef;
use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error raised by a backend that persists to files or sockets.
    /// [`crate::InMemoryBackend`] never returns it.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The partition was never prepared with `prepare_table`.
    #[error("unknown table {topic_id}/{table_id}")]
    UnknownTable {
        /// Topic of the partition.
        topic_id: String,
        /// Table of the partition.
        table_id: String,
    },

    /// The partition has no table header document yet.
    #[error("no table header for {topic_id}/{table_id}")]
    NoTableHeader {
        /// Topic of the partition.
        topic_id: String,
        /// Table of the partition.
        table_id: String,
    },

    /// The referenced document does not exist.
    #[error("document {0} not found")]
    DocumentNotFound(DocRef),

    /// Another live document already owns this merge key.
    #[error("merge key {merge_key:?} already in use")]
    DuplicateMergeKey {
        /// The conflicting key.
        merge_key: String,
    },

    /// A header patch would break a header invariant.
    #[error("invalid header patch: {message}")]
    InvalidPatch {
        /// Which invariant was violated.
        message: String,
    },
}

impl StorageError {
    /// Creates an invalid patch error.
    pub fn invalid_patch(message: impl Into<String>) -> Self {
        Self::InvalidPatch {
            message: message.into(),
        }
    }
}
