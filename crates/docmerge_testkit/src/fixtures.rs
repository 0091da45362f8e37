//! Test fixtures and engine helpers.
//!
//! Provides an engine over [`InMemoryBackend`] bound to one partition, and
//! deterministic record builders.

use docmerge_codec::Record;
use docmerge_core::{assign_level, Config, Engine};
use docmerge_storage::{DocRef, DocumentBackend, Header, InMemoryBackend, TableContext};
use sha2::{Digest, Sha256};
use std::ops::{Range, RangeInclusive};

/// Size limit used by most scenarios: a 200-byte payload record is about
/// 220 serialized bytes, so a chunk closes after four of them.
pub const DEFAULT_TEST_LIMIT: usize = 1536;

/// Partition used by fixtures.
pub fn test_context() -> TableContext {
    TableContext::new("test_topic", "test_table")
}

/// Incompressible bytes derived from `seed`.
///
/// Built from a SHA-256 chain so compressed sizes are predictable.
pub fn payload_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut block = Sha256::digest(seed.to_le_bytes());
    while out.len() < len {
        out.extend_from_slice(&block);
        block = Sha256::digest(block);
    }
    out.truncate(len);
    out
}

/// One aged record per age, payload seeded by the age.
pub fn aged_records(ages: RangeInclusive<i64>, payload_len: usize) -> Vec<Record> {
    ages.map(|age| Record::aged(age).with("payload", payload_bytes(age as u64, payload_len)))
        .collect()
}

/// One sequenced record per sequence, payload seeded by the sequence.
pub fn sequence_records(seqs: Range<u64>, payload_len: usize) -> Vec<Record> {
    seqs.map(|seq| {
        Record::sequenced(seq.to_string()).with("payload", payload_bytes(seq, payload_len))
    })
    .collect()
}

/// Finds an extraction sequence whose chunk keys have acceptable levels.
///
/// Aged merge keys are `start_seq + end_age`; `accept` receives the level
/// of each key built from `end_ages`, in order.
///
/// # Panics
///
/// Panics if no candidate is accepted.
pub fn pick_start_seq(end_ages: &[u64], accept: impl Fn(&[u8]) -> bool) -> String {
    for i in 0..200_000 {
        let start_seq = format!("X{i}");
        let levels: Vec<u8> = end_ages
            .iter()
            .map(|end| assign_level(&format!("{start_seq}{end}")))
            .collect();
        if accept(&levels) {
            return start_seq;
        }
    }
    panic!("no start_seq yields the requested levels");
}

/// Finds a sequence base `b` such that the keys `b + offset` have
/// acceptable levels.
///
/// # Panics
///
/// Panics if no candidate is accepted.
pub fn pick_sequence_base(offsets: &[u64], accept: impl Fn(&[u8]) -> bool) -> u64 {
    for base in (1_000..10_000_000).step_by(1_000) {
        let levels: Vec<u8> = offsets
            .iter()
            .map(|offset| assign_level(&(base + offset).to_string()))
            .collect();
        if accept(&levels) {
            return base;
        }
    }
    panic!("no sequence base yields the requested levels");
}

/// An engine over a fresh in-memory backend, bound to one partition.
pub struct TestEngine {
    /// The engine instance.
    pub engine: Engine<InMemoryBackend>,
    /// The partition every helper uses.
    pub ctx: TableContext,
}

impl TestEngine {
    /// Creates an engine and stores the partition's table header.
    pub fn new(size_limit: usize) -> Self {
        let test = Self::without_table_header(size_limit);
        test.engine
            .add_document(
                &test.ctx,
                Header::for_table(&test.ctx).with_ages(1, 1),
                Vec::new(),
            )
            .expect("Failed to store table header");
        test
    }

    /// Creates an engine over a prepared but empty partition.
    pub fn without_table_header(size_limit: usize) -> Self {
        let engine = Engine::new(
            InMemoryBackend::new(),
            Config::new().size_limit(size_limit),
        )
        .expect("Failed to create engine");
        let ctx = test_context();
        engine
            .backend()
            .prepare_table(&ctx)
            .expect("Failed to prepare table");
        Self { engine, ctx }
    }

    /// Ingests one record per age in `ages`, declared over the same range.
    pub fn ingest_aged(
        &self,
        start_seq: Option<&str>,
        ages: RangeInclusive<u64>,
        payload_len: usize,
    ) -> Vec<Header> {
        let mut header = Header::for_table(&self.ctx).with_ages(*ages.start(), *ages.end());
        header.start_seq = start_seq.map(str::to_string);
        let records = aged_records(*ages.start() as i64..=*ages.end() as i64, payload_len);
        self.engine
            .add_document(&self.ctx, header, records)
            .expect("Failed to ingest aged batch")
    }

    /// Ingests one record per sequence in `seqs`.
    pub fn ingest_sequence(
        &self,
        deposit_at: &str,
        seqs: Range<u64>,
        payload_len: usize,
    ) -> Vec<Header> {
        let header = Header::for_table(&self.ctx).with_deposit_at(deposit_at);
        self.engine
            .add_document(&self.ctx, header, sequence_records(seqs, payload_len))
            .expect("Failed to ingest sequence batch")
    }

    /// Reference of the document owning `merge_key`.
    pub fn doc_ref(&self, merge_key: &str) -> DocRef {
        self.backend()
            .get_ref_by_merge_key(&self.ctx, merge_key)
            .expect("Failed to look up merge key")
            .unwrap_or_else(|| panic!("no document owns {merge_key:?}"))
    }

    /// Header of the document owning `merge_key`.
    pub fn header(&self, merge_key: &str) -> Header {
        self.backend()
            .get_header_from_ref(&self.ctx, self.doc_ref(merge_key))
            .expect("Failed to read header")
            .expect("Document vanished")
    }

    /// Runs `merge_documents` on the fixture partition.
    pub fn merge(&self, merge_key: &str, target: u8) -> bool {
        self.engine
            .merge_documents(&self.ctx, merge_key, target)
            .expect("Merge failed")
    }

    /// Mutating backend calls so far.
    pub fn writes(&self) -> u64 {
        self.backend().write_count()
    }

    /// Live documents, table header included.
    pub fn document_count(&self) -> usize {
        self.backend().document_count(&self.ctx)
    }
}

impl std::ops::Deref for TestEngine {
    type Target = Engine<InMemoryBackend>;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_deterministic() {
        assert_eq!(payload_bytes(7, 100), payload_bytes(7, 100));
        assert_ne!(payload_bytes(7, 100), payload_bytes(8, 100));
        assert_eq!(payload_bytes(1, 33).len(), 33);
    }

    #[test]
    fn fixture_has_table_header() {
        let test = TestEngine::new(DEFAULT_TEST_LIMIT);
        assert_eq!(test.document_count(), 1);
        assert!(test.table_counters(&test.ctx).unwrap().is_some());
    }

    #[test]
    fn picked_start_seq_matches_levels() {
        let seq = pick_start_seq(&[5, 9], |levels| levels == [0, 1]);
        assert_eq!(assign_level(&format!("{seq}5")), 0);
        assert_eq!(assign_level(&format!("{seq}9")), 1);
    }
}
