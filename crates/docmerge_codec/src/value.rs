//! Dynamic field value type.

use crate::error::{CodecError, CodecResult};
use ciborium::value::{Integer, Value as CborValue};

/// A dynamic record field value.
///
/// Mirrors the CBOR data model minus floats: records carry counters,
/// sequence strings and opaque payloads, none of which need them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer (full i64 range).
    Integer(i64),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Text string (UTF-8).
    Text(String),
    /// Array of values.
    Array(Vec<Value>),
    /// Map of key-value pairs, in insertion order.
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a text string, if it is one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as a byte string, if it is one.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub(crate) fn into_cbor(self) -> CborValue {
        match self {
            Value::Null => CborValue::Null,
            Value::Bool(b) => CborValue::Bool(b),
            Value::Integer(n) => CborValue::Integer(Integer::from(n)),
            Value::Bytes(b) => CborValue::Bytes(b),
            Value::Text(s) => CborValue::Text(s),
            Value::Array(items) => {
                CborValue::Array(items.into_iter().map(Value::into_cbor).collect())
            }
            Value::Map(pairs) => CborValue::Map(
                pairs
                    .into_iter()
                    .map(|(k, v)| (k.into_cbor(), v.into_cbor()))
                    .collect(),
            ),
        }
    }

    pub(crate) fn from_cbor(value: CborValue) -> CodecResult<Self> {
        Ok(match value {
            CborValue::Null => Value::Null,
            CborValue::Bool(b) => Value::Bool(b),
            CborValue::Integer(n) => {
                Value::Integer(i64::try_from(n).map_err(|_| CodecError::IntegerOverflow)?)
            }
            CborValue::Bytes(b) => Value::Bytes(b),
            CborValue::Text(s) => Value::Text(s),
            CborValue::Float(_) => return Err(CodecError::FloatForbidden),
            // Tags carry no meaning for records, keep the tagged value.
            CborValue::Tag(_, inner) => Value::from_cbor(*inner)?,
            CborValue::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(Value::from_cbor)
                    .collect::<CodecResult<_>>()?,
            ),
            CborValue::Map(pairs) => Value::Map(
                pairs
                    .into_iter()
                    .map(|(k, v)| Ok((Value::from_cbor(k)?, Value::from_cbor(v)?)))
                    .collect::<CodecResult<_>>()?,
            ),
            other => {
                return Err(CodecError::invalid_structure(format!(
                    "unsupported CBOR item: {other:?}"
                )))
            }
        })
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}
