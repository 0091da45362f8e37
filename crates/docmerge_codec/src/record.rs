//! Records and their reserved fields.
//!
//! A record is an open mapping of payload fields. Three keys are reserved
//! and form part of the persisted record schema:
//!
//! - `_AGE` - integer generation counter (aged flow)
//! - `_SEQ` - decimal sequence string (normal flow)
//! - `_NO` - dense position inside the document, re-stamped on every write

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use ciborium::value::Value as CborValue;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Reserved generation counter field.
pub const AGE_FIELD: &str = "_AGE";
/// Reserved sequence field.
pub const SEQ_FIELD: &str = "_SEQ";
/// Reserved position field.
pub const NO_FIELD: &str = "_NO";

/// A single record: field name to value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an aged record carrying `_AGE`.
    #[must_use]
    pub fn aged(age: i64) -> Self {
        Self::new().with(AGE_FIELD, age)
    }

    /// Creates a sequenced record carrying `_SEQ`.
    #[must_use]
    pub fn sequenced(seq: impl Into<String>) -> Self {
        Self::new().with(SEQ_FIELD, seq.into())
    }

    /// Builder-style field insertion.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Sets a field, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(name.into(), value.into())
    }

    /// Gets a field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Removes a field.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// Iterates over fields in key order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The `_AGE` generation, if present and integral.
    pub fn age(&self) -> Option<i64> {
        self.get(AGE_FIELD).and_then(Value::as_integer)
    }

    /// The `_SEQ` sequence, if present and textual.
    pub fn seq(&self) -> Option<&str> {
        self.get(SEQ_FIELD).and_then(Value::as_text)
    }

    /// The `_NO` position, if present.
    pub fn no(&self) -> Option<i64> {
        self.get(NO_FIELD).and_then(Value::as_integer)
    }

    /// Overwrites `_NO`.
    pub fn set_no(&mut self, no: i64) {
        self.fields.insert(NO_FIELD.to_string(), Value::Integer(no));
    }

    /// Record without its `_NO` stamp, for comparisons across re-chunking.
    #[must_use]
    pub fn without_no(&self) -> Self {
        let mut copy = self.clone();
        copy.remove(NO_FIELD);
        copy
    }

    pub(crate) fn to_cbor(&self) -> CborValue {
        CborValue::Map(
            self.fields
                .iter()
                .map(|(k, v)| (CborValue::Text(k.clone()), v.clone().into_cbor()))
                .collect(),
        )
    }

    pub(crate) fn from_cbor(value: CborValue) -> CodecResult<Self> {
        let CborValue::Map(pairs) = value else {
            return Err(CodecError::invalid_structure("record is not a map"));
        };

        let mut fields = BTreeMap::new();
        for (key, value) in pairs {
            let CborValue::Text(name) = key else {
                return Err(CodecError::invalid_structure("record key is not text"));
            };
            fields.insert(name, Value::from_cbor(value)?);
        }
        Ok(Self { fields })
    }
}

/// Orders decimal sequence strings numerically.
///
/// Shorter strings sort first; equal-length strings compare bytewise, which
/// matches lexicographic order for the fixed-width sequences producers emit.
pub fn cmp_seq(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn cmp_opt_seq(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => cmp_seq(a, b),
        (a, b) => a.is_some().cmp(&b.is_some()),
    }
}

/// Sorts records by `(_AGE, _NO)`. Stable.
pub fn sort_aged(records: &mut [Record]) {
    records.sort_by(|a, b| a.age().cmp(&b.age()).then_with(|| a.no().cmp(&b.no())));
}

/// Sorts records by `(_SEQ, _NO)`. Stable.
pub fn sort_sequenced(records: &mut [Record]) {
    records.sort_by(|a, b| {
        cmp_opt_seq(a.seq(), b.seq()).then_with(|| a.no().cmp(&b.no()))
    });
}

/// Sorts records by `(_AGE, _SEQ, _NO)`. Stable.
pub fn sort_mixed(records: &mut [Record]) {
    records.sort_by(|a, b| {
        a.age()
            .cmp(&b.age())
            .then_with(|| cmp_opt_seq(a.seq(), b.seq()))
            .then_with(|| a.no().cmp(&b.no()))
    });
}
