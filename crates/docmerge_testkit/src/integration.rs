//! Cross-crate integration test helpers.
//!
//! Provides a harness that ingests consecutive aged or sequence batches,
//! tracks every record written, and checks the partition after compaction.

use crate::fixtures::{payload_bytes, TestEngine};
use crate::generators::{BatchPlan, SequencePlan};
use docmerge_codec::{sort_aged, sort_sequenced, Record};
use docmerge_core::{CompactionReport, Flow, TOP_MERGE_LEVEL};
use docmerge_storage::{DocRef, Header};

/// First generation after the table header.
pub const FIRST_DATA_AGE: u64 = 2;

/// First sequence number the harness hands out.
pub const FIRST_SEQUENCE: u64 = 1_000;

/// Live data documents (table header excluded), oldest coverage first.
pub fn data_documents(test: &TestEngine) -> Vec<(DocRef, Header)> {
    let mut docs: Vec<(DocRef, Header)> = test
        .backend()
        .snapshot(&test.ctx)
        .into_iter()
        .filter(|(_, header)| !header.is_table_header())
        .collect();
    docs.sort_by_key(|(_, header)| {
        Flow::of(header)
            .and_then(|flow| flow.span(header))
            .map(|span| span.start)
            .expect("Document without coverage")
    });
    docs
}

/// Asserts that the documents of `flow` cover `first..=last` exactly once.
pub fn assert_contiguous(test: &TestEngine, flow: Flow, first: u128, last: u128) {
    let mut expected = first;
    for (doc_ref, header) in data_documents(test) {
        let span = flow.span(&header).expect("Document without coverage");
        assert_eq!(
            span.start, expected,
            "{doc_ref} starts at {} but coverage continues at {expected}",
            span.start
        );
        expected = span.end + 1;
    }
    assert_eq!(expected, last + 1, "coverage ends at {}", expected - 1);
}

/// Asserts that the documents of `flow` are ordered, never overlap, and
/// hold only records inside their own range. Holes are allowed.
pub fn assert_disjoint(test: &TestEngine, flow: Flow) {
    let mut previous: Option<u128> = None;
    for (doc_ref, header) in data_documents(test) {
        let span = flow.span(&header).expect("Document without coverage");
        if let Some(end) = previous {
            assert!(
                span.start > end,
                "{doc_ref} starts at {} inside the previous document ending at {end}",
                span.start
            );
        }
        previous = Some(span.end);

        let records = test
            .get_records(&test.ctx, doc_ref)
            .expect("Failed to read records");
        for record in &records {
            let position = position_of(flow, record);
            assert!(
                span.contains(position),
                "{doc_ref} holds position {position} outside {}..={}",
                span.start,
                span.end
            );
        }
    }
}

fn position_of(flow: Flow, record: &Record) -> u128 {
    match flow {
        Flow::Aged => record.age().and_then(|age| u128::try_from(age).ok()),
        Flow::Normal => record.seq().and_then(|seq| seq.parse().ok()),
    }
    .expect("Record without position")
}

/// A test harness for ingest-then-compact scenarios.
///
/// A harness drives one flow: [`Self::new`] ingests aged batches,
/// [`Self::sequenced`] ingests sequence batches.
pub struct CompactionHarness {
    /// The engine under test.
    pub test: TestEngine,
    flow: Flow,
    ingested: Vec<Record>,
    next_age: u64,
    next_seq: u64,
    batches: u64,
}

impl CompactionHarness {
    /// Creates an aged harness over a partition holding only its table
    /// header.
    pub fn new(size_limit: usize) -> Self {
        Self::with_flow(size_limit, Flow::Aged)
    }

    /// Creates a sequence harness over a partition holding only its table
    /// header.
    pub fn sequenced(size_limit: usize) -> Self {
        Self::with_flow(size_limit, Flow::Normal)
    }

    fn with_flow(size_limit: usize, flow: Flow) -> Self {
        Self {
            test: TestEngine::new(size_limit),
            flow,
            ingested: Vec::new(),
            next_age: FIRST_DATA_AGE,
            next_seq: FIRST_SEQUENCE,
            batches: 0,
        }
    }

    /// Ingests the next aged batch, continuing right after the previous one.
    ///
    /// # Panics
    ///
    /// Panics on a sequence harness.
    pub fn ingest(&mut self, plan: &BatchPlan) -> Vec<Header> {
        assert_eq!(self.flow, Flow::Aged, "aged batch on a sequence harness");
        let first = self.next_age;
        let last = first + plan.ages - 1;
        let mut records = Vec::new();
        for age in first..=last {
            for copy in 0..plan.records_per_age {
                let seed = age * 16 + copy as u64;
                records.push(
                    Record::aged(age as i64).with("payload", payload_bytes(seed, plan.payload_len)),
                );
            }
        }
        self.ingested.extend(records.iter().cloned());
        self.next_age = last + 1;

        let header = Header::for_table(&self.test.ctx).with_ages(first, last);
        self.test
            .add_document(&self.test.ctx, header, records)
            .expect("Failed to ingest batch")
    }

    /// Ingests the next sequence batch after skipping `plan.skip`
    /// sequence numbers. Deposit times increase with every batch.
    ///
    /// # Panics
    ///
    /// Panics on an aged harness.
    pub fn ingest_sequence(&mut self, plan: &SequencePlan) -> Vec<Header> {
        assert_eq!(self.flow, Flow::Normal, "sequence batch on an aged harness");
        let first = self.next_seq + plan.skip;
        let records: Vec<Record> = (first..first + plan.records as u64)
            .map(|seq| {
                Record::sequenced(seq.to_string())
                    .with("payload", payload_bytes(seq, plan.payload_len))
            })
            .collect();
        self.ingested.extend(records.iter().cloned());
        self.next_seq = first + plan.records as u64;
        self.batches += 1;

        let deposit_at = format!("2026010100{:012}", self.batches);
        let header = Header::for_table(&self.test.ctx).with_deposit_at(deposit_at);
        self.test
            .add_document(&self.test.ctx, header, records)
            .expect("Failed to ingest sequence batch")
    }

    /// Runs every pending merge.
    pub fn compact(&self) -> CompactionReport {
        self.test
            .compact_all(&self.test.ctx)
            .expect("Compaction failed")
    }

    /// Number of records ingested so far.
    pub fn tracked_count(&self) -> usize {
        self.ingested.len()
    }

    /// Verifies coverage, record preservation and size bounds.
    ///
    /// Aged coverage must be contiguous from the first data generation;
    /// sequence coverage must be ordered and non-overlapping.
    pub fn verify_all(&self) {
        let limit = self.test.config().size_limit as u64;
        match self.flow {
            Flow::Aged if self.next_age > FIRST_DATA_AGE => assert_contiguous(
                &self.test,
                Flow::Aged,
                u128::from(FIRST_DATA_AGE),
                u128::from(self.next_age - 1),
            ),
            Flow::Aged => {}
            Flow::Normal => assert_disjoint(&self.test, Flow::Normal),
        }

        let mut stored = Vec::new();
        for (doc_ref, header) in data_documents(&self.test) {
            assert!(header.data_size < limit, "{doc_ref} exceeds the size limit");
            let records = self
                .test
                .get_records(&self.test.ctx, doc_ref)
                .expect("Failed to read records");
            assert_eq!(records.len() as u64, header.line_nb, "{doc_ref} line count");
            stored.extend(records.iter().map(Record::without_no));
        }

        let mut expected = self.ingested.clone();
        let sort: fn(&mut [Record]) = match self.flow {
            Flow::Aged => sort_aged,
            Flow::Normal => sort_sequenced,
        };
        sort(&mut expected);
        sort(&mut stored);
        assert_eq!(stored.len(), expected.len(), "record count changed");
        assert_eq!(stored, expected, "records changed");
    }

    /// Verifies that every document reached the level its key allows.
    pub fn assert_fully_compacted(&self) {
        for (doc_ref, header) in data_documents(&self.test) {
            assert!(
                header.merged_level >= header.merge_level.min(TOP_MERGE_LEVEL),
                "{doc_ref} left at level {} below its merge level {}",
                header.merged_level,
                header.merge_level
            );
        }
    }
}
