//! Ingestion: turning record batches into stored documents.

use crate::chunk::{seal_block, AgedChunks, Chunk, SequenceChunks};
use crate::engine::Engine;
use crate::error::{CoreError, CoreResult};
use crate::flow::clear_segment_markers;
use crate::level::assign_level;
use docmerge_codec::{sort_aged, sort_mixed, sort_sequenced, Record};
use docmerge_storage::{
    DocRef, DocumentBackend, Header, HeaderPatch, MergeStatus, TableContext, TABLE_HEADER_LEVEL,
};

/// `age` that marks a batch as the table header document.
pub const TABLE_HEADER_AGE: u64 = 1;

/// `sort_key` of an aged document: the extraction sequence, then the
/// zero-padded last generation.
pub(crate) fn aged_sort_key(start_seq: &str, end_age: u64) -> String {
    format!("{start_seq}{end_age:020}")
}

/// `sort_key` of a normal document: deposit time, then the zero-padded
/// start sequence.
pub(crate) fn normal_sort_key(deposit_at: &str, start_seq: &str) -> String {
    format!("{deposit_at}{start_seq:0>40}")
}

/// Current time in the deposit format, microsecond precision.
fn deposit_timestamp() -> String {
    chrono::Utc::now().format("%Y%m%d%H%M%S%6f").to_string()
}

impl<B: DocumentBackend> Engine<B> {
    /// Ingests one batch of records.
    ///
    /// - `age == 1` stores the table header document (one document,
    ///   no chunking)
    /// - any other `age` chunks the batch by `_AGE`
    /// - no `age` chunks the batch by `_SEQ`
    ///
    /// Chunks are built in full before anything is written, so a batch that
    /// fails chunking leaves the backend untouched. If storing a chunk
    /// fails, the chunks already stored for the batch are deleted before
    /// the error is returned.
    ///
    /// Returns the persisted header of every document created.
    ///
    /// # Errors
    ///
    /// - [`CoreError::DocumentTooLarge`] if a chunk cannot fit `size_limit`
    /// - [`CoreError::AgeOutOfRange`] if a record's `_AGE` is outside the
    ///   declared `[age, end_age]`
    /// - [`CoreError::MalformedHeader`] if a normal batch has no start
    ///   sequence at all
    /// - [`CoreError::Storage`] if the backend fails
    pub fn add_document(
        &self,
        ctx: &TableContext,
        header: Header,
        mut records: Vec<Record>,
    ) -> CoreResult<Vec<Header>> {
        self.backend.prepare_table(ctx)?;

        let mut template = header;
        template.topic_id = ctx.topic_id.clone();
        template.table_id = ctx.table_id.clone();
        if template.deposit_at.is_none() {
            template.deposit_at = Some(deposit_timestamp());
        }
        template.merge_status = MergeStatus::Initial;
        template.merged_level = 0;
        clear_segment_markers(&mut template);

        if template.age == Some(TABLE_HEADER_AGE) {
            return self.put_table_header(ctx, template, records).map(|h| vec![h]);
        }

        let chunks = if template.age.is_some() {
            sort_aged(&mut records);
            let start_seq = template.start_seq.clone().unwrap_or_default();
            AgedChunks::new(&self.config, template, &records)?
                .map(|chunk| chunk.and_then(|c| stamp_aged(c, &start_seq)))
                .collect::<CoreResult<Vec<_>>>()?
        } else {
            sort_sequenced(&mut records);
            SequenceChunks::new(&self.config, template, &records)?
                .map(|chunk| chunk.and_then(stamp_normal))
                .collect::<CoreResult<Vec<_>>>()?
        };

        let mut headers = Vec::with_capacity(chunks.len());
        let mut written = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let (doc_ref, stored) = match self.backend.add_document(ctx, chunk.header, chunk.blob)
            {
                Ok(created) => created,
                Err(err) => {
                    self.discard_batch(ctx, &written);
                    return Err(err.into());
                }
            };
            written.push(doc_ref);
            tracing::debug!(
                table = %ctx,
                %doc_ref,
                merge_key = stored.merge_key.as_deref().unwrap_or_default(),
                merge_level = stored.merge_level,
                records = chunk.count,
                "stored chunk"
            );
            headers.push(stored);
        }
        Ok(headers)
    }

    /// Replaces a stored document.
    ///
    /// With `records`, the body is re-sorted by `(_AGE, _SEQ, _NO)` and
    /// compressed as one blob; `patch` is applied to the stored header and
    /// `line_nb`/`data_size` follow the new body. Without `records`, only the
    /// patched header fields change.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DocumentTooLarge`] before any write if the new
    /// body reaches `size_limit`, [`CoreError::DocumentNotFound`] if
    /// `doc_ref` is absent, and storage errors for invalid patches.
    pub fn update_document(
        &self,
        ctx: &TableContext,
        doc_ref: DocRef,
        patch: &HeaderPatch,
        records: Option<Vec<Record>>,
    ) -> CoreResult<Header> {
        let Some(mut records) = records else {
            return Ok(self.backend.update_header(ctx, doc_ref, patch)?);
        };

        let mut header = self
            .backend
            .get_header_from_ref(ctx, doc_ref)?
            .ok_or(CoreError::DocumentNotFound { doc_ref })?;
        sort_mixed(&mut records);
        let blob = seal_block(&self.config, &mut records)?;

        patch.apply(&mut header)?;
        header.line_nb = records.len() as u64;
        header.data_size = blob.len() as u64;
        Ok(self.backend.update_document(ctx, doc_ref, header, blob)?)
    }

    /// Deletes the chunks of a batch whose ingestion failed part way.
    fn discard_batch(&self, ctx: &TableContext, written: &[DocRef]) {
        if written.is_empty() {
            return;
        }
        if let Err(err) = self.backend.delete_documents(ctx, written) {
            tracing::warn!(
                table = %ctx,
                chunks = written.len(),
                error = %err,
                "failed to discard a partially stored batch"
            );
        }
    }

    /// Creates or replaces the table header document. Existing counters
    /// are carried over.
    fn put_table_header(
        &self,
        ctx: &TableContext,
        mut header: Header,
        mut records: Vec<Record>,
    ) -> CoreResult<Header> {
        sort_mixed(&mut records);
        let blob = seal_block(&self.config, &mut records)?;

        header.age = Some(TABLE_HEADER_AGE);
        header.end_age = Some(TABLE_HEADER_AGE);
        header.aged = true;
        header.merge_key = None;
        header.merge_level = TABLE_HEADER_LEVEL;
        header.merge_status = MergeStatus::Header;
        header.sort_key = String::new();
        header.line_nb = records.len() as u64;
        header.data_size = blob.len() as u64;

        let existing = self.backend.get_table_header(ctx)?;
        let stored = match existing {
            Some(doc_ref) => {
                if let Some(current) = self.backend.get_header_from_ref(ctx, doc_ref)? {
                    current.counters().add_to(&mut header);
                }
                self.backend.update_document(ctx, doc_ref, header, blob)?
            }
            None => self.backend.add_document(ctx, header, blob)?.1,
        };
        tracing::debug!(table = %ctx, "stored table header");
        Ok(stored)
    }
}

fn stamp_aged(mut chunk: Chunk, start_seq: &str) -> CoreResult<Chunk> {
    let end_age = chunk
        .header
        .end_age
        .ok_or_else(|| CoreError::malformed_header("aged chunk without end_age"))?;
    let merge_key = format!("{start_seq}{end_age}");
    chunk.header.sort_key = aged_sort_key(start_seq, end_age);
    chunk.header.merge_level = assign_level(&merge_key);
    chunk.header.merge_key = Some(merge_key);
    Ok(chunk)
}

fn stamp_normal(mut chunk: Chunk) -> CoreResult<Chunk> {
    let start_seq = chunk
        .header
        .start_seq
        .clone()
        .ok_or_else(|| CoreError::malformed_header("sequence chunk without start_seq"))?;
    let deposit_at = chunk.header.deposit_at.clone().unwrap_or_default();
    chunk.header.sort_key = normal_sort_key(&deposit_at, &start_seq);
    chunk.header.merge_level = assign_level(&start_seq);
    chunk.header.merge_key = Some(start_seq);
    chunk.header.aged = false;
    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use docmerge_codec::decode_block;
    use docmerge_storage::{FieldUpdate, InMemoryBackend, TableCounters};

    fn engine(size_limit: usize) -> Engine<InMemoryBackend> {
        Engine::new(InMemoryBackend::new(), Config::new().size_limit(size_limit)).unwrap()
    }

    fn ctx() -> TableContext {
        TableContext::new("topic", "table")
    }

    fn table_header() -> Header {
        Header::for_table(&ctx()).with_ages(1, 1)
    }

    #[test]
    fn sort_keys_order_by_coverage() {
        assert!(aged_sort_key("S", 9) < aged_sort_key("S", 10));
        assert!(normal_sort_key("20240101", "9") < normal_sort_key("20240101", "10"));
        assert!(normal_sort_key("20240101", "99") < normal_sort_key("20240102", "1"));
    }

    #[test]
    fn table_header_document() {
        let engine = engine(1 << 20);
        let headers = engine
            .add_document(&ctx(), table_header(), vec![Record::new().with("schema", "v1")])
            .unwrap();

        assert_eq!(headers.len(), 1);
        let header = &headers[0];
        assert_eq!(header.merge_status, MergeStatus::Header);
        assert_eq!(header.merge_level, TABLE_HEADER_LEVEL);
        assert_eq!(header.line_nb, 1);
        assert!(header.deposit_at.is_some());
        assert!(engine.backend().get_table_header(&ctx()).unwrap().is_some());
    }

    #[test]
    fn table_header_replacement_keeps_counters() {
        let engine = engine(1 << 20);
        engine.add_document(&ctx(), table_header(), vec![]).unwrap();
        engine
            .backend()
            .inc_table_header(&ctx(), TableCounters::merged(40, 2))
            .unwrap();

        let headers = engine.add_document(&ctx(), table_header(), vec![]).unwrap();
        assert_eq!(headers[0].merged_size, 40);
        assert_eq!(engine.backend().document_count(&ctx()), 1);
    }

    #[test]
    fn aged_batch_keys_and_levels() {
        let engine = engine(1 << 20);
        let header = Header::for_table(&ctx()).with_ages(2, 5).with_start_seq("S");
        let records = (2..=5).map(Record::aged).collect();
        let headers = engine.add_document(&ctx(), header, records).unwrap();

        assert_eq!(headers.len(), 1);
        let stored = &headers[0];
        assert_eq!(stored.merge_key.as_deref(), Some("S5"));
        assert_eq!(stored.sort_key, "S00000000000000000005");
        assert_eq!(stored.merge_level, assign_level("S5"));
        assert_eq!(stored.merge_status, MergeStatus::Initial);
        assert_eq!(stored.merged_level, 0);
        assert_eq!(stored.line_nb, 4);
        assert!(stored.aged);
    }

    #[test]
    fn normal_batch_uses_smallest_seq() {
        let engine = engine(1 << 20);
        let header = Header::for_table(&ctx()).with_deposit_at("20240101000000000000");
        let records = vec![Record::sequenced("12"), Record::sequenced("10")];
        let headers = engine.add_document(&ctx(), header, records).unwrap();

        let stored = &headers[0];
        assert_eq!(stored.merge_key.as_deref(), Some("10"));
        assert_eq!(stored.end_seq.as_deref(), Some("12"));
        assert!(stored.sort_key.starts_with("20240101000000000000"));
        assert!(!stored.aged);
    }

    #[test]
    fn normal_batch_without_any_sequence_is_malformed() {
        let engine = engine(1 << 20);
        let result = engine.add_document(&ctx(), Header::for_table(&ctx()), vec![]);
        assert!(matches!(result, Err(CoreError::MalformedHeader { .. })));
    }

    #[test]
    fn failed_chunking_writes_nothing() {
        let engine = engine(1 << 20);
        let header = Header::for_table(&ctx()).with_ages(2, 3);
        let records = vec![Record::aged(2), Record::aged(7)];
        let result = engine.add_document(&ctx(), header, records);

        assert!(matches!(result, Err(CoreError::AgeOutOfRange { .. })));
        assert_eq!(engine.backend().document_count(&ctx()), 0);
    }

    #[test]
    fn update_with_records_resorts_and_restamps() {
        let engine = engine(1 << 20);
        let header = Header::for_table(&ctx()).with_ages(2, 3);
        let stored = engine
            .add_document(&ctx(), header, vec![Record::aged(2)])
            .unwrap();
        let doc_ref = engine
            .backend()
            .get_ref_by_merge_key(&ctx(), stored[0].merge_key.as_deref().unwrap())
            .unwrap()
            .unwrap();

        let patch = HeaderPatch::new().deposit_at(FieldUpdate::Delete);
        let updated = engine
            .update_document(
                &ctx(),
                doc_ref,
                &patch,
                Some(vec![Record::aged(3), Record::aged(2)]),
            )
            .unwrap();

        assert_eq!(updated.line_nb, 2);
        assert_eq!(updated.deposit_at, None);
        let records = decode_block(&engine.backend().get_blob(&ctx(), doc_ref).unwrap()).unwrap();
        let keys: Vec<_> = records.iter().map(|r| (r.age(), r.no())).collect();
        assert_eq!(keys, vec![(Some(2), Some(0)), (Some(3), Some(1))]);
    }

    #[test]
    fn update_header_only() {
        let engine = engine(1 << 20);
        let header = Header::for_table(&ctx()).with_ages(2, 2);
        engine.add_document(&ctx(), header, vec![]).unwrap();
        let doc_ref = engine.backend().get_ref_by_merge_key(&ctx(), "2").unwrap().unwrap();

        let updated = engine
            .update_document(&ctx(), doc_ref, &HeaderPatch::new().merged_level(1), None)
            .unwrap();
        assert_eq!(updated.merged_level, 1);
    }

    #[test]
    fn update_missing_document() {
        let engine = engine(1 << 20);
        engine.backend().prepare_table(&ctx()).unwrap();
        let result = engine.update_document(&ctx(), DocRef::new(77), &HeaderPatch::new(), Some(vec![]));
        assert!(matches!(result, Err(CoreError::DocumentNotFound { .. })));
    }
}
