//! # docmerge codec
//!
//! Record model and compressed block format for docmerge.
//!
//! Documents store their records as one opaque blob. This crate defines
//! what a record is and how a list of records becomes a blob:
//!
//! - Each record is encoded as one CBOR map (text keys)
//! - Records are concatenated and compressed into a single zstd frame
//! - Every blob decodes on its own; no dictionary or side table is needed
//!
//! ## Usage
//!
//! ```
//! use docmerge_codec::{decode_block, encode_block, Record, DEFAULT_COMPRESSION_LEVEL};
//!
//! let records = vec![Record::aged(2).with("name", "alpha")];
//! let blob = encode_block(&records, DEFAULT_COMPRESSION_LEVEL).unwrap();
//! assert_eq!(decode_block(&blob).unwrap(), records);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod block;
mod error;
mod record;
mod value;

pub use block::{decode_block, encode_block, BlockEncoder, DEFAULT_COMPRESSION_LEVEL};
pub use error::{CodecError, CodecResult};
pub use record::{
    cmp_seq, sort_aged, sort_mixed, sort_sequenced, Record, AGE_FIELD, NO_FIELD, SEQ_FIELD,
};
pub use value::Value;
