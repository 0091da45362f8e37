//! Size-bounded chunking of record batches.
//!
//! A batch is cut into chunks whose compressed blob stays below
//! `size_limit`. The writer feeds records into a streaming compressor and,
//! every `size_limit / 8` serialized bytes, flushes it to measure the real
//! compressed size. Once that reaches `size_limit / 2` the chunk is ready
//! and closes at the next position boundary: a chunk never splits records
//! sharing one `_AGE` (aged) or one `_SEQ` (sequence).
//!
//! Every chunk re-stamps `_NO` from zero. Even an empty batch yields one
//! placeholder chunk with an empty compressed body.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::flow::{record_age, record_seq};
use docmerge_codec::{encode_block, BlockEncoder, Record};
use docmerge_storage::Header;

/// One chunk produced from a batch.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Header template stamped with the chunk's covered range.
    pub header: Header,
    /// Compressed body.
    pub blob: Vec<u8>,
    /// Number of records in the body.
    pub count: usize,
}

/// Streaming writer for one chunk.
struct ChunkWriter<'a> {
    config: &'a Config,
    encoder: BlockEncoder,
    boundary: usize,
    ready: bool,
}

impl<'a> ChunkWriter<'a> {
    fn new(config: &'a Config) -> CoreResult<Self> {
        Ok(Self {
            config,
            encoder: BlockEncoder::new(config.compression_level)?,
            boundary: config.chunk_step(),
            ready: false,
        })
    }

    fn count(&self) -> usize {
        self.encoder.record_count()
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    /// Stamps `_NO` on a copy of `record` and feeds it.
    fn push(&mut self, record: &Record) -> CoreResult<()> {
        let mut stamped = record.clone();
        stamped.set_no(self.count() as i64);
        self.encoder.push(&stamped)?;

        let raw = self.encoder.raw_bytes();
        if !self.ready && raw >= self.boundary {
            if self.encoder.flush()? >= self.config.chunk_target() {
                self.ready = true;
            } else {
                while self.boundary <= raw {
                    self.boundary += self.config.chunk_step();
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> CoreResult<(Vec<u8>, usize)> {
        let count = self.count();
        let limit = self.config.size_limit;
        let blob = self.encoder.finish()?;
        check_size(blob.len(), limit)?;
        Ok((blob, count))
    }
}

fn check_size(size: usize, limit: usize) -> CoreResult<()> {
    if size >= limit {
        return Err(CoreError::DocumentTooLarge { size, limit });
    }
    Ok(())
}

/// Re-stamps `_NO` densely and compresses `records` as one blob.
///
/// Used wherever a document is written whole (table header, updates,
/// merges) rather than chunked.
pub(crate) fn seal_block(config: &Config, records: &mut [Record]) -> CoreResult<Vec<u8>> {
    for (no, record) in records.iter_mut().enumerate() {
        record.set_no(no as i64);
    }
    let blob = encode_block(records, config.compression_level)?;
    check_size(blob.len(), config.size_limit)?;
    Ok(blob)
}

/// Chunks of an age-ordered batch.
///
/// Records must already be sorted by `(_AGE, _NO)`. Chunk `i` covers
/// `[age_i, end_age_i]` with `age_0` the declared `age`,
/// `age_{i+1} = end_age_i + 1` and the last `end_age` the declared
/// `end_age`, so the chunks partition the declared range exactly.
///
/// Iteration stops after the first error. The iterator is `Clone`; a clone
/// replays the remaining chunks.
#[derive(Clone)]
pub struct AgedChunks<'a> {
    config: &'a Config,
    template: Header,
    records: &'a [Record],
    pos: usize,
    next_age: u64,
    declared_start: u64,
    declared_end: u64,
    done: bool,
}

impl<'a> AgedChunks<'a> {
    /// Prepares chunking of `records` under `template`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MalformedHeader`] if the template has no `age`
    /// or its `end_age` precedes its `age`.
    pub fn new(config: &'a Config, template: Header, records: &'a [Record]) -> CoreResult<Self> {
        let declared_start = template
            .age
            .ok_or_else(|| CoreError::malformed_header("aged batch without age"))?;
        let declared_end = template.end_age.unwrap_or(declared_start);
        if declared_end < declared_start {
            return Err(CoreError::malformed_header(format!(
                "end_age {declared_end} precedes age {declared_start}"
            )));
        }
        Ok(Self {
            config,
            template,
            records,
            pos: 0,
            next_age: declared_start,
            declared_start,
            declared_end,
            done: false,
        })
    }

    fn build(&mut self) -> CoreResult<Chunk> {
        let start_age = self.next_age;
        let mut writer = ChunkWriter::new(self.config)?;
        let mut last_age = None;

        while let Some(record) = self.records.get(self.pos) {
            let age = record_age(record)?;
            if age < self.declared_start || age > self.declared_end {
                return Err(CoreError::AgeOutOfRange {
                    age,
                    declared_start: self.declared_start,
                    declared_end: self.declared_end,
                });
            }
            if writer.is_ready() && last_age != Some(age) {
                break;
            }
            writer.push(record)?;
            last_age = Some(age);
            self.pos += 1;
        }

        let exhausted = self.pos >= self.records.len();
        let end_age = match last_age {
            Some(age) if !exhausted => age,
            _ => self.declared_end,
        };
        let (blob, count) = writer.finish()?;

        let mut header = self.template.clone();
        header.age = Some(start_age);
        header.end_age = Some(end_age);
        header.aged = true;
        header.line_nb = count as u64;
        header.data_size = blob.len() as u64;

        self.next_age = end_age.saturating_add(1);
        self.done = exhausted;
        Ok(Chunk {
            header,
            blob,
            count,
        })
    }
}

impl Iterator for AgedChunks<'_> {
    type Item = CoreResult<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let chunk = self.build();
        if chunk.is_err() {
            self.done = true;
        }
        Some(chunk)
    }
}

/// Chunks of a sequence-ordered batch.
///
/// Records must already be sorted by `(_SEQ, _NO)`. The first chunk starts
/// at the declared `start_seq`, or at the smallest `_SEQ` when none is
/// declared; each chunk's `end_seq` is its largest `_SEQ` and the next
/// chunk starts right after it.
#[derive(Clone)]
pub struct SequenceChunks<'a> {
    config: &'a Config,
    template: Header,
    records: &'a [Record],
    pos: usize,
    next_start: String,
    floor: u128,
    done: bool,
}

impl<'a> SequenceChunks<'a> {
    /// Prepares chunking of `records` under `template`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MalformedHeader`] if no start sequence is
    /// declared and none can be derived from the records, and
    /// [`CoreError::MalformedRecord`] if a record's `_SEQ` is unusable.
    pub fn new(config: &'a Config, template: Header, records: &'a [Record]) -> CoreResult<Self> {
        let (next_start, floor) = match template.start_seq.as_deref() {
            Some(seq) => {
                let floor = crate::flow::parse_seq(seq).map_err(CoreError::malformed_header)?;
                (seq.to_string(), floor)
            }
            None => {
                let mut min: Option<(u128, &str)> = None;
                for record in records {
                    let value = record_seq(record)?;
                    if min.map_or(true, |(current, _)| value < current) {
                        min = Some((value, record.seq().unwrap_or_default()));
                    }
                }
                let (floor, seq) = min.ok_or_else(|| {
                    CoreError::malformed_header("no age, no start_seq and no _SEQ in records")
                })?;
                (seq.to_string(), floor)
            }
        };
        Ok(Self {
            config,
            template,
            records,
            pos: 0,
            next_start,
            floor,
            done: false,
        })
    }

    fn build(&mut self) -> CoreResult<Chunk> {
        let mut writer = ChunkWriter::new(self.config)?;
        let mut last_seq = None;

        while let Some(record) = self.records.get(self.pos) {
            let seq = record_seq(record)?;
            if seq < self.floor {
                return Err(CoreError::malformed_record(format!(
                    "_SEQ {seq} precedes the batch start {}",
                    self.floor
                )));
            }
            if writer.is_ready() && last_seq != Some(seq) {
                break;
            }
            writer.push(record)?;
            last_seq = Some(seq);
            self.pos += 1;
        }

        let (blob, count) = writer.finish()?;
        let mut header = self.template.clone();
        header.start_seq = Some(self.next_start.clone());
        header.end_seq = last_seq.map(|seq| seq.to_string());
        header.line_nb = count as u64;
        header.data_size = blob.len() as u64;

        self.done = self.pos >= self.records.len();
        if let Some(seq) = last_seq {
            self.next_start = seq.saturating_add(1).to_string();
        }
        Ok(Chunk {
            header,
            blob,
            count,
        })
    }
}

impl Iterator for SequenceChunks<'_> {
    type Item = CoreResult<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let chunk = self.build();
        if chunk.is_err() {
            self.done = true;
        }
        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmerge_codec::{decode_block, sort_aged, sort_sequenced};
    use docmerge_storage::TableContext;
    use proptest::prelude::*;
    use sha2::{Digest, Sha256};

    /// Incompressible filler derived from a seed.
    fn noise(seed: u64, len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        let mut block = Sha256::digest(seed.to_le_bytes()).to_vec();
        while out.len() < len {
            out.extend_from_slice(&block);
            block = Sha256::digest(&block).to_vec();
        }
        out.truncate(len);
        out
    }

    fn template() -> Header {
        Header::for_table(&TableContext::new("t", "x"))
    }

    fn aged_batch(ages: &[i64], payload: usize) -> Vec<Record> {
        ages.iter()
            .enumerate()
            .map(|(i, age)| Record::aged(*age).with("payload", noise(i as u64, payload)))
            .collect()
    }

    fn collect(chunks: impl Iterator<Item = CoreResult<Chunk>>) -> Vec<Chunk> {
        chunks.collect::<CoreResult<Vec<_>>>().unwrap()
    }

    #[test]
    fn empty_batch_yields_placeholder() {
        let config = Config::default();
        let chunks = collect(AgedChunks::new(&config, template().with_ages(4, 6), &[]).unwrap());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].count, 0);
        assert_eq!(chunks[0].header.age, Some(4));
        assert_eq!(chunks[0].header.end_age, Some(6));
        assert!(decode_block(&chunks[0].blob).unwrap().is_empty());

        let seq = collect(
            SequenceChunks::new(&config, template().with_start_seq("10"), &[]).unwrap(),
        );
        assert_eq!(seq.len(), 1);
        assert_eq!(seq[0].header.start_seq.as_deref(), Some("10"));
        assert_eq!(seq[0].header.end_seq, None);
    }

    #[test]
    fn aged_chunks_partition_declared_range() {
        let config = Config::new().size_limit(1536);
        let ages: Vec<i64> = (2..=11).collect();
        let records = aged_batch(&ages, 200);
        let chunks = collect(
            AgedChunks::new(&config, template().with_ages(2, 11), &records).unwrap(),
        );

        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].header.age, Some(2));
        assert_eq!(chunks.last().unwrap().header.end_age, Some(11));
        for pair in chunks.windows(2) {
            assert_eq!(
                pair[1].header.age.unwrap(),
                pair[0].header.end_age.unwrap() + 1
            );
        }
        for chunk in &chunks {
            assert!(chunk.blob.len() < 1536);
            let decoded = decode_block(&chunk.blob).unwrap();
            let nos: Vec<_> = decoded.iter().map(|r| r.no().unwrap()).collect();
            assert_eq!(nos, (0..chunk.count as i64).collect::<Vec<_>>());
        }
    }

    #[test]
    fn last_chunk_extends_to_declared_end() {
        let config = Config::default();
        let records = aged_batch(&[3, 4], 10);
        let chunks = collect(
            AgedChunks::new(&config, template().with_ages(3, 8), &records).unwrap(),
        );
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].header.end_age, Some(8));
    }

    #[test]
    fn chunks_never_split_one_age() {
        let config = Config::new().size_limit(4096);
        let records = aged_batch(&[2, 2, 2, 2, 2, 2, 2, 2, 3], 300);
        let chunks = collect(
            AgedChunks::new(&config, template().with_ages(2, 3), &records).unwrap(),
        );
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].count, 8);
        assert_eq!(chunks[0].header.end_age, Some(2));
        assert_eq!(chunks[1].header.age, Some(3));
    }

    #[test]
    fn age_beyond_declared_end_is_fatal() {
        let config = Config::default();
        let records = aged_batch(&[2, 9], 10);
        let result: CoreResult<Vec<_>> =
            AgedChunks::new(&config, template().with_ages(2, 5), &records)
                .unwrap()
                .collect();
        assert!(matches!(
            result,
            Err(CoreError::AgeOutOfRange { age: 9, .. })
        ));
    }

    #[test]
    fn single_age_too_large_is_fatal() {
        let config = Config::new().size_limit(1024);
        let records = aged_batch(&[2, 2, 2, 2, 2, 2, 2], 200);
        let result: CoreResult<Vec<_>> =
            AgedChunks::new(&config, template().with_ages(2, 2), &records)
                .unwrap()
                .collect();
        assert!(matches!(result, Err(CoreError::DocumentTooLarge { .. })));
    }

    #[test]
    fn sequence_chunks_are_contiguous() {
        let config = Config::new().size_limit(1536);
        let records: Vec<Record> = (100..110)
            .map(|seq| Record::sequenced(seq.to_string()).with("payload", noise(seq, 200)))
            .collect();
        let chunks = collect(SequenceChunks::new(&config, template(), &records).unwrap());

        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].header.start_seq.as_deref(), Some("100"));
        assert_eq!(chunks.last().unwrap().header.end_seq.as_deref(), Some("109"));
        for pair in chunks.windows(2) {
            let end: u128 = pair[0].header.end_seq.as_deref().unwrap().parse().unwrap();
            let next: u128 = pair[1].header.start_seq.as_deref().unwrap().parse().unwrap();
            assert_eq!(next, end + 1);
        }
    }

    #[test]
    fn sequence_without_start_is_malformed() {
        let config = Config::default();
        let result = SequenceChunks::new(&config, template(), &[]);
        assert!(matches!(result, Err(CoreError::MalformedHeader { .. })));
    }

    #[test]
    fn seal_block_checks_size() {
        let config = Config::new().size_limit(256);
        let mut small = vec![Record::aged(2), Record::aged(3)];
        let blob = seal_block(&config, &mut small).unwrap();
        assert_eq!(decode_block(&blob).unwrap()[1].no(), Some(1));

        let mut big = aged_batch(&[2], 400);
        assert!(matches!(
            seal_block(&config, &mut big),
            Err(CoreError::DocumentTooLarge { .. })
        ));
    }

    #[test]
    fn clone_replays_remaining_chunks() {
        let config = Config::new().size_limit(1536);
        let ages: Vec<i64> = (2..=11).collect();
        let records = aged_batch(&ages, 200);
        let chunks = AgedChunks::new(&config, template().with_ages(2, 11), &records).unwrap();

        let first: Vec<_> = collect(chunks.clone())
            .into_iter()
            .map(|c| c.header.end_age)
            .collect();
        let second: Vec<_> = collect(chunks).into_iter().map(|c| c.header.end_age).collect();
        assert_eq!(first, second);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn aged_chunks_preserve_records(
            ages in proptest::collection::vec(2i64..40, 0..60),
            payload in 0usize..60,
        ) {
            let config = Config::new().size_limit(4096);
            let mut records = aged_batch(&ages, payload);
            sort_aged(&mut records);
            let chunks = collect(
                AgedChunks::new(&config, template().with_ages(2, 40), &records).unwrap(),
            );

            let mut rebuilt = Vec::new();
            for chunk in &chunks {
                prop_assert!(chunk.blob.len() < 4096);
                rebuilt.extend(decode_block(&chunk.blob).unwrap().iter().map(Record::without_no));
            }
            let expected: Vec<_> = records.iter().map(Record::without_no).collect();
            prop_assert_eq!(rebuilt, expected);
        }

        #[test]
        fn sequence_chunks_preserve_records(
            seqs in proptest::collection::vec(1u64..10_000, 1..60),
        ) {
            let config = Config::new().size_limit(2048);
            let mut records: Vec<Record> = seqs
                .iter()
                .map(|seq| Record::sequenced(seq.to_string()).with("payload", noise(*seq, 60)))
                .collect();
            sort_sequenced(&mut records);
            let chunks = collect(SequenceChunks::new(&config, template(), &records).unwrap());

            let mut rebuilt = Vec::new();
            for chunk in &chunks {
                prop_assert!(chunk.blob.len() < 2048);
                rebuilt.extend(decode_block(&chunk.blob).unwrap().iter().map(Record::without_no));
            }
            let expected: Vec<_> = records.iter().map(Record::without_no).collect();
            prop_assert_eq!(rebuilt, expected);
        }
    }
}
