//! Document backend trait definition.

use crate::error::StorageResult;
use crate::header::{Header, HeaderPatch, MergeStatus, TableContext, TableCounters};
use std::fmt;

/// Opaque reference to a stored document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocRef(pub u64);

impl DocRef {
    /// Creates a reference from its raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DocRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc:{}", self.0)
    }
}

/// Filter and direction of a sort-key ordered stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamQuery {
    /// Only documents in one of these states are returned.
    pub statuses: Vec<MergeStatus>,
    /// Bound on `sort_key`: an upper bound when `reverse`, lower otherwise.
    pub bound: Option<String>,
    /// Walk from newest to oldest.
    pub reverse: bool,
    /// Only documents with `merge_level >= min_merge_level` are returned.
    pub min_merge_level: u8,
    /// Whether a document whose `sort_key` equals `bound` is included.
    pub inclusive: bool,
}

impl StreamQuery {
    /// All documents, oldest first.
    pub fn all() -> Self {
        Self {
            statuses: vec![MergeStatus::Header, MergeStatus::Initial, MergeStatus::Merged],
            bound: None,
            reverse: false,
            min_merge_level: 0,
            inclusive: true,
        }
    }

    /// Documents strictly older than `sort_key`, newest first.
    pub fn older_than(sort_key: impl Into<String>) -> Self {
        Self {
            bound: Some(sort_key.into()),
            reverse: true,
            inclusive: false,
            ..Self::all()
        }
    }

    /// Restricts the statuses returned.
    #[must_use]
    pub fn statuses(mut self, statuses: &[MergeStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    /// Restricts to `merge_level >= level`.
    #[must_use]
    pub fn min_merge_level(mut self, level: u8) -> Self {
        self.min_merge_level = level;
        self
    }

    /// Whether a document with this key, status and level passes the query.
    pub fn matches(&self, sort_key: &str, status: MergeStatus, merge_level: u8) -> bool {
        if !self.statuses.contains(&status) || merge_level < self.min_merge_level {
            return false;
        }
        let Some(bound) = self.bound.as_deref() else {
            return true;
        };
        if self.inclusive && sort_key == bound {
            return true;
        }
        if self.reverse {
            sort_key < bound
        } else {
            sort_key > bound
        }
    }
}

/// Single-pass stream of document references.
///
/// Backends may produce references lazily or from a snapshot taken when
/// the stream is opened. Either way the engine reads headers through
/// [`DocumentBackend::get_header_from_ref`] as it walks, so documents
/// deleted after the stream opened are skipped.
pub type DocStream = Box<dyn Iterator<Item = DocRef> + Send>;

/// A document store the compaction engine runs against.
///
/// Backends persist headers and opaque blobs. They never decode blobs;
/// the engine owns the record format.
///
/// # Invariants
///
/// - `merge_key` identifies at most one live document per partition
/// - `delete_documents` succeeds for references that no longer exist
/// - `inc_table_header` adds atomically with respect to other increments
/// - Streams are ordered by `sort_key`, ties broken by creation order
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing and simulation
pub trait DocumentBackend: Send + Sync {
    /// Prepares storage for a partition. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the partition cannot be prepared.
    fn prepare_table(&self, ctx: &TableContext) -> StorageResult<()>;

    /// Creates one document and returns its reference and persisted header.
    ///
    /// # Errors
    ///
    /// Returns an error if the partition is unknown, the merge key is
    /// taken, or the write fails.
    fn add_document(
        &self,
        ctx: &TableContext,
        header: Header,
        blob: Vec<u8>,
    ) -> StorageResult<(DocRef, Header)>;

    /// Replaces header and body of an existing document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not exist or the write fails.
    fn update_document(
        &self,
        ctx: &TableContext,
        doc_ref: DocRef,
        header: Header,
        blob: Vec<u8>,
    ) -> StorageResult<Header>;

    /// Patches only the given header fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not exist or the patch is
    /// invalid for the stored header.
    fn update_header(
        &self,
        ctx: &TableContext,
        doc_ref: DocRef,
        patch: &HeaderPatch,
    ) -> StorageResult<Header>;

    /// Deletes documents. Missing references are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete itself fails.
    fn delete_documents(&self, ctx: &TableContext, refs: &[DocRef]) -> StorageResult<bool>;

    /// Looks up the live document owning `merge_key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn get_ref_by_merge_key(
        &self,
        ctx: &TableContext,
        merge_key: &str,
    ) -> StorageResult<Option<DocRef>>;

    /// Returns the table header document, if created.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn get_table_header(&self, ctx: &TableContext) -> StorageResult<Option<DocRef>>;

    /// Adds `counters` onto the table header document.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no table header or the write fails.
    fn inc_table_header(
        &self,
        ctx: &TableContext,
        counters: TableCounters,
    ) -> StorageResult<Header>;

    /// Fetches a header without its body.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get_header_from_ref(
        &self,
        ctx: &TableContext,
        doc_ref: DocRef,
    ) -> StorageResult<Option<Header>>;

    /// Fetches the compressed body.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not exist or the read fails.
    fn get_blob(&self, ctx: &TableContext, doc_ref: DocRef) -> StorageResult<Vec<u8>>;

    /// Streams references ordered by `sort_key`.
    ///
    /// The stream may be lazy or an eager snapshot of the matching
    /// references; [`super::InMemoryBackend`] snapshots.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be opened.
    fn get_stream_by_sort_key(
        &self,
        ctx: &TableContext,
        query: &StreamQuery,
    ) -> StorageResult<DocStream>;
}
