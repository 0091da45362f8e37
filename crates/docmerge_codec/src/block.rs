//! Compressed record blocks.
//!
//! A block is a single zstd frame over a concatenation of CBOR-encoded
//! records. Blocks are independently decodable: nothing outside the blob is
//! needed to read it back.

use crate::error::{CodecError, CodecResult};
use crate::record::Record;
use std::io::Write;

/// Default zstd compression level.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Streaming block writer.
///
/// Tracks both the number of serialized bytes fed in and the number of
/// compressed bytes produced so far. The compressed count only moves when
/// the compressor emits output; [`BlockEncoder::flush`] forces it to.
pub struct BlockEncoder {
    encoder: zstd::stream::write::Encoder<'static, Vec<u8>>,
    raw_bytes: usize,
    records: usize,
}

impl BlockEncoder {
    /// Creates an encoder with the given zstd level.
    ///
    /// # Errors
    ///
    /// Returns an error if the compressor cannot be initialized.
    pub fn new(level: i32) -> CodecResult<Self> {
        Ok(Self {
            encoder: zstd::stream::write::Encoder::new(Vec::new(), level)?,
            raw_bytes: 0,
            records: 0,
        })
    }

    /// Serializes and feeds one record, returning its serialized size.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or compression fails.
    pub fn push(&mut self, record: &Record) -> CodecResult<usize> {
        let mut buf = Vec::new();
        ciborium::into_writer(&record.to_cbor(), &mut buf)
            .map_err(|e| CodecError::encoding_failed(format!("{e:?}")))?;
        self.encoder.write_all(&buf)?;
        self.raw_bytes += buf.len();
        self.records += 1;
        Ok(buf.len())
    }

    /// Forces buffered input through the compressor.
    ///
    /// Returns the compressed size after the flush.
    ///
    /// # Errors
    ///
    /// Returns an error if compression fails.
    pub fn flush(&mut self) -> CodecResult<usize> {
        self.encoder.flush()?;
        Ok(self.compressed_bytes())
    }

    /// Serialized (uncompressed) bytes fed so far.
    pub fn raw_bytes(&self) -> usize {
        self.raw_bytes
    }

    /// Compressed bytes emitted so far.
    pub fn compressed_bytes(&self) -> usize {
        self.encoder.get_ref().len()
    }

    /// Number of records fed so far.
    pub fn record_count(&self) -> usize {
        self.records
    }

    /// Closes the frame and returns the blob.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be finished.
    pub fn finish(self) -> CodecResult<Vec<u8>> {
        Ok(self.encoder.finish()?)
    }
}

/// Encodes records into one blob.
///
/// # Errors
///
/// Returns an error if serialization or compression fails.
pub fn encode_block(records: &[Record], level: i32) -> CodecResult<Vec<u8>> {
    let mut encoder = BlockEncoder::new(level)?;
    for record in records {
        encoder.push(record)?;
    }
    encoder.finish()
}

/// Decodes a blob back into records, in stored order.
///
/// # Errors
///
/// Returns an error if the blob is not a valid zstd frame or holds
/// anything other than a sequence of record maps.
pub fn decode_block(blob: &[u8]) -> CodecResult<Vec<Record>> {
    let raw = zstd::stream::decode_all(blob)?;
    let mut cursor: &[u8] = &raw;
    let mut records = Vec::new();

    while !cursor.is_empty() {
        let item: ciborium::value::Value = ciborium::from_reader(&mut cursor)
            .map_err(|e| CodecError::decoding_failed(format!("{e:?}")))?;
        records.push(Record::from_cbor(item)?);
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SEQ_FIELD;

    fn sample(n: i64) -> Vec<Record> {
        (0..n)
            .map(|i| Record::aged(i).with(SEQ_FIELD, format!("{}", 1000 + i)).with("v", i * 3))
            .collect()
    }

    #[test]
    fn empty_block_is_decodable() {
        let blob = encode_block(&[], DEFAULT_COMPRESSION_LEVEL).unwrap();
        assert!(!blob.is_empty());
        assert!(decode_block(&blob).unwrap().is_empty());
    }

    #[test]
    fn block_preserves_order_and_fields() {
        let records = sample(20);
        let blob = encode_block(&records, DEFAULT_COMPRESSION_LEVEL).unwrap();
        assert_eq!(decode_block(&blob).unwrap(), records);
    }

    #[test]
    fn encoder_counts_raw_and_compressed_bytes() {
        let mut encoder = BlockEncoder::new(DEFAULT_COMPRESSION_LEVEL).unwrap();
        let mut fed = 0;
        for record in sample(50) {
            fed += encoder.push(&record).unwrap();
        }
        assert_eq!(encoder.raw_bytes(), fed);
        assert_eq!(encoder.record_count(), 50);

        let flushed = encoder.flush().unwrap();
        assert!(flushed > 0);
        assert_eq!(flushed, encoder.compressed_bytes());

        let blob = encoder.finish().unwrap();
        assert!(blob.len() >= flushed);
        assert_eq!(decode_block(&blob).unwrap().len(), 50);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_block(b"not a zstd frame").is_err());
    }
}
