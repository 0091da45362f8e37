//! The engine handle and its read and scheduling helpers.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::merge::MergeLocks;
use docmerge_codec::{decode_block, Record};
use docmerge_storage::{
    DocRef, DocumentBackend, MergeStatus, StreamQuery, TableContext, TableCounters,
};

/// Chunking and compaction engine over a document backend.
///
/// The engine is synchronous and holds no per-partition state: every call
/// names its partition through a [`TableContext`], so one engine can serve
/// many partitions. Ingestion lives in `add_document`/`update_document`,
/// compaction in `merge_documents`.
///
/// # Example
///
/// ```rust
/// use docmerge_codec::Record;
/// use docmerge_core::{Config, Engine};
/// use docmerge_storage::{Header, InMemoryBackend, TableContext};
///
/// let engine = Engine::new(InMemoryBackend::new(), Config::default()).unwrap();
/// let ctx = TableContext::new("events", "clicks");
///
/// engine
///     .add_document(&ctx, Header::for_table(&ctx).with_ages(1, 1), vec![])
///     .unwrap();
/// let records = (2..=4).map(Record::aged).collect();
/// let headers = engine
///     .add_document(&ctx, Header::for_table(&ctx).with_ages(2, 4), records)
///     .unwrap();
///
/// let key = headers[0].merge_key.clone().unwrap();
/// assert!(engine.merge_documents(&ctx, &key, 0).unwrap());
/// ```
pub struct Engine<B: DocumentBackend> {
    pub(crate) backend: B,
    pub(crate) config: Config,
    pub(crate) locks: MergeLocks,
}

/// Outcome counts of [`Engine::compact_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionReport {
    /// `merge_documents` calls made.
    pub attempted: usize,
    /// Calls that reached their target.
    pub succeeded: usize,
    /// Calls that reported "not ready".
    pub not_ready: usize,
}

impl<B: DocumentBackend> Engine<B> {
    /// Creates an engine.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] if the configuration is invalid.
    pub fn new(backend: B, config: Config) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            config,
            locks: MergeLocks::new(),
        })
    }

    /// The underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The engine configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Decodes the records of a stored document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is absent or its body is corrupt.
    pub fn get_records(&self, ctx: &TableContext, doc_ref: DocRef) -> CoreResult<Vec<Record>> {
        let blob = self.backend.get_blob(ctx, doc_ref)?;
        Ok(decode_block(&blob)?)
    }

    /// Aggregate merge counters of the partition, if it has a table header.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn table_counters(&self, ctx: &TableContext) -> CoreResult<Option<TableCounters>> {
        let Some(doc_ref) = self.backend.get_table_header(ctx)? else {
            return Ok(None);
        };
        Ok(self
            .backend
            .get_header_from_ref(ctx, doc_ref)?
            .map(|header| header.counters()))
    }

    /// Merge keys ready to be compacted to `target`, oldest first.
    ///
    /// A document qualifies when its `merge_level` is at least `target` and
    /// its `merged_level` is exactly `target - 1`. Level 0 never has
    /// pending merges.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn pending_merges(&self, ctx: &TableContext, target: u8) -> CoreResult<Vec<String>> {
        if target == 0 {
            return Ok(Vec::new());
        }
        let query = StreamQuery::all()
            .statuses(&[MergeStatus::Initial, MergeStatus::Merged])
            .min_merge_level(target);

        let mut keys = Vec::new();
        for doc_ref in self.backend.get_stream_by_sort_key(ctx, &query)? {
            let Some(header) = self.backend.get_header_from_ref(ctx, doc_ref)? else {
                continue;
            };
            if header.merged_level + 1 == target {
                keys.extend(header.merge_key);
            }
        }
        Ok(keys)
    }

    /// Runs every pending merge, level by level, until a full sweep makes
    /// no progress.
    ///
    /// # Errors
    ///
    /// Stops at the first fatal error of `merge_documents`.
    pub fn compact_all(&self, ctx: &TableContext) -> CoreResult<CompactionReport> {
        let mut report = CompactionReport::default();
        loop {
            let before = report.succeeded;
            for target in 1..=self.config.max_merge_level {
                for key in self.pending_merges(ctx, target)? {
                    report.attempted += 1;
                    if self.merge_documents(ctx, &key, target)? {
                        report.succeeded += 1;
                    } else {
                        report.not_ready += 1;
                    }
                }
            }
            if report.succeeded == before {
                break;
            }
        }
        tracing::info!(
            table = %ctx,
            attempted = report.attempted,
            succeeded = report.succeeded,
            not_ready = report.not_ready,
            "compaction sweep finished"
        );
        Ok(report)
    }
}

impl<B: DocumentBackend + std::fmt::Debug> std::fmt::Debug for Engine<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("backend", &self.backend)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
