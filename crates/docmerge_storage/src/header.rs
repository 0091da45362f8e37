//! Document header model.
//!
//! Field names are the persisted header format; serde reproduces them
//! exactly, so a backend serializing [`Header`] stays compatible with
//! existing stores.

use crate::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// `merge_level` of the table header document.
pub const TABLE_HEADER_LEVEL: u8 = 9;

/// A (topic, table) partition.
///
/// Passed explicitly on every backend and engine call.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableContext {
    /// Topic identifier.
    pub topic_id: String,
    /// Table identifier.
    pub table_id: String,
}

impl TableContext {
    /// Creates a partition context.
    pub fn new(topic_id: impl Into<String>, table_id: impl Into<String>) -> Self {
        Self {
            topic_id: topic_id.into(),
            table_id: table_id.into(),
        }
    }
}

impl fmt::Display for TableContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic_id, self.table_id)
    }
}

/// Lifecycle state of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStatus {
    /// The table header document.
    Header,
    /// Freshly ingested, never repacked.
    #[default]
    Initial,
    /// Repacked by a merge.
    Merged,
}

/// Document metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Header {
    /// Topic of the owning partition.
    pub topic_id: String,
    /// Table of the owning partition.
    pub table_id: String,
    /// First generation covered (aged flow).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u64>,
    /// Last generation covered (aged flow).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_age: Option<u64>,
    /// First sequence covered (normal flow); extraction sequence for aged batches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_seq: Option<String>,
    /// Last sequence covered (normal flow).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_seq: Option<String>,
    /// Lineage key; also the input of level assignment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_key: Option<String>,
    /// Hash-derived level, fixed at birth.
    #[serde(default)]
    pub merge_level: u8,
    /// Highest level this document has been compacted to.
    #[serde(default)]
    pub merged_level: u8,
    /// Lifecycle state.
    #[serde(default)]
    pub merge_status: MergeStatus,
    /// Ordering key of the document stream.
    #[serde(default)]
    pub sort_key: String,
    /// Start of the aged segment this leader stands for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_start_age: Option<u64>,
    /// Start of the normal-flow segment this leader stands for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_start_time: Option<String>,
    /// Number of records in the body.
    #[serde(default)]
    pub line_nb: u64,
    /// Deposit timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deposit_at: Option<String>,
    /// Size of the compressed body in bytes.
    #[serde(default)]
    pub data_size: u64,
    /// Whether the document belongs to the aged flow.
    #[serde(default)]
    pub aged: bool,
    /// Bytes written by merges below the top level (table header only).
    #[serde(default)]
    pub merged_size: u64,
    /// Records written by merges below the top level (table header only).
    #[serde(default)]
    pub merged_lines: u64,
    /// Bytes written by top-level merges (table header only).
    #[serde(default)]
    pub packaged_size: u64,
    /// Records written by top-level merges (table header only).
    #[serde(default)]
    pub packaged_lines: u64,
}

impl Header {
    /// Creates an empty header for a partition.
    pub fn for_table(ctx: &TableContext) -> Self {
        Self {
            topic_id: ctx.topic_id.clone(),
            table_id: ctx.table_id.clone(),
            ..Self::default()
        }
    }

    /// Declares an aged range.
    #[must_use]
    pub fn with_ages(mut self, age: u64, end_age: u64) -> Self {
        self.age = Some(age);
        self.end_age = Some(end_age);
        self.aged = true;
        self
    }

    /// Declares the starting sequence.
    #[must_use]
    pub fn with_start_seq(mut self, start_seq: impl Into<String>) -> Self {
        self.start_seq = Some(start_seq.into());
        self
    }

    /// Sets the deposit timestamp.
    #[must_use]
    pub fn with_deposit_at(mut self, deposit_at: impl Into<String>) -> Self {
        self.deposit_at = Some(deposit_at.into());
        self
    }

    /// Whether this is the table header document.
    pub fn is_table_header(&self) -> bool {
        self.merge_status == MergeStatus::Header
    }

    /// Aggregate counters carried by the table header.
    pub fn counters(&self) -> TableCounters {
        TableCounters {
            merged_size: self.merged_size,
            merged_lines: self.merged_lines,
            packaged_size: self.packaged_size,
            packaged_lines: self.packaged_lines,
        }
    }
}

/// Explicit update of an optional header field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldUpdate<T> {
    /// Store this value.
    Set(T),
    /// Remove the field.
    Delete,
}

impl<T: Clone> FieldUpdate<T> {
    fn apply_to(&self, slot: &mut Option<T>) {
        *slot = match self {
            FieldUpdate::Set(value) => Some(value.clone()),
            FieldUpdate::Delete => None,
        };
    }
}

/// A partial header update.
///
/// Fields left as `None` are untouched. Identity fields (`merge_key`,
/// `merge_level`, `sort_key`, partition) cannot be patched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderPatch {
    /// New `age`.
    pub age: Option<FieldUpdate<u64>>,
    /// New `end_age`.
    pub end_age: Option<FieldUpdate<u64>>,
    /// New `start_seq`.
    pub start_seq: Option<FieldUpdate<String>>,
    /// New `end_seq`.
    pub end_seq: Option<FieldUpdate<String>>,
    /// New `segment_start_age`.
    pub segment_start_age: Option<FieldUpdate<u64>>,
    /// New `segment_start_time`.
    pub segment_start_time: Option<FieldUpdate<String>>,
    /// New `deposit_at`.
    pub deposit_at: Option<FieldUpdate<String>>,
    /// New `merged_level`; must not decrease.
    pub merged_level: Option<u8>,
    /// New `merge_status`; only `initial -> merged` is allowed.
    pub merge_status: Option<MergeStatus>,
    /// New `line_nb`.
    pub line_nb: Option<u64>,
    /// New `data_size`.
    pub data_size: Option<u64>,
}

impl HeaderPatch {
    /// Creates an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `merged_level`.
    #[must_use]
    pub fn merged_level(mut self, level: u8) -> Self {
        self.merged_level = Some(level);
        self
    }

    /// Sets `merge_status`.
    #[must_use]
    pub fn merge_status(mut self, status: MergeStatus) -> Self {
        self.merge_status = Some(status);
        self
    }

    /// Updates `segment_start_age`.
    #[must_use]
    pub fn segment_start_age(mut self, update: FieldUpdate<u64>) -> Self {
        self.segment_start_age = Some(update);
        self
    }

    /// Updates `segment_start_time`.
    #[must_use]
    pub fn segment_start_time(mut self, update: FieldUpdate<String>) -> Self {
        self.segment_start_time = Some(update);
        self
    }

    /// Updates `deposit_at`.
    #[must_use]
    pub fn deposit_at(mut self, update: FieldUpdate<String>) -> Self {
        self.deposit_at = Some(update);
        self
    }

    /// Whether the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Applies the patch in place.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidPatch`] if the patch lowers
    /// `merged_level` or moves `merge_status` anywhere but
    /// `initial -> merged`. The header is left untouched in that case.
    pub fn apply(&self, header: &mut Header) -> StorageResult<()> {
        if let Some(level) = self.merged_level {
            if level < header.merged_level {
                return Err(StorageError::invalid_patch(format!(
                    "merged_level cannot go from {} to {}",
                    header.merged_level, level
                )));
            }
        }
        if let Some(status) = self.merge_status {
            let allowed = status == header.merge_status
                || (header.merge_status == MergeStatus::Initial && status == MergeStatus::Merged);
            if !allowed {
                return Err(StorageError::invalid_patch(format!(
                    "merge_status cannot go from {:?} to {:?}",
                    header.merge_status, status
                )));
            }
        }

        if let Some(update) = &self.age {
            update.apply_to(&mut header.age);
        }
        if let Some(update) = &self.end_age {
            update.apply_to(&mut header.end_age);
        }
        if let Some(update) = &self.start_seq {
            update.apply_to(&mut header.start_seq);
        }
        if let Some(update) = &self.end_seq {
            update.apply_to(&mut header.end_seq);
        }
        if let Some(update) = &self.segment_start_age {
            update.apply_to(&mut header.segment_start_age);
        }
        if let Some(update) = &self.segment_start_time {
            update.apply_to(&mut header.segment_start_time);
        }
        if let Some(update) = &self.deposit_at {
            update.apply_to(&mut header.deposit_at);
        }
        if let Some(level) = self.merged_level {
            header.merged_level = level;
        }
        if let Some(status) = self.merge_status {
            header.merge_status = status;
        }
        if let Some(lines) = self.line_nb {
            header.line_nb = lines;
        }
        if let Some(size) = self.data_size {
            header.data_size = size;
        }
        Ok(())
    }
}

/// Running aggregate counters held by the table header document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounters {
    /// Bytes written by merges below the top level.
    pub merged_size: u64,
    /// Records written by merges below the top level.
    pub merged_lines: u64,
    /// Bytes written by top-level merges.
    pub packaged_size: u64,
    /// Records written by top-level merges.
    pub packaged_lines: u64,
}

impl TableCounters {
    /// Counters for one merged output document.
    #[must_use]
    pub const fn merged(size: u64, lines: u64) -> Self {
        Self {
            merged_size: size,
            merged_lines: lines,
            packaged_size: 0,
            packaged_lines: 0,
        }
    }

    /// Counters for one packaged (top-level) output document.
    #[must_use]
    pub const fn packaged(size: u64, lines: u64) -> Self {
        Self {
            merged_size: 0,
            merged_lines: 0,
            packaged_size: size,
            packaged_lines: lines,
        }
    }

    /// Adds these counters onto a table header.
    pub fn add_to(&self, header: &mut Header) {
        header.merged_size += self.merged_size;
        header.merged_lines += self.merged_lines;
        header.packaged_size += self.packaged_size;
        header.packaged_lines += self.packaged_lines;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Header {
        Header::for_table(&TableContext::new("topic", "table")).with_ages(4, 9)
    }

    #[test]
    fn serde_uses_persisted_field_names() {
        let mut h = header();
        h.merge_status = MergeStatus::Merged;
        h.segment_start_age = Some(2);
        let json = serde_json::to_value(&h).unwrap();

        assert_eq!(json["topic_id"], "topic");
        assert_eq!(json["end_age"], 9);
        assert_eq!(json["merge_status"], "merged");
        assert_eq!(json["segment_start_age"], 2);
        assert!(json.get("segment_start_time").is_none());

        let back: Header = serde_json::from_value(json).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn patch_sets_and_deletes_fields() {
        let mut h = header();
        h.segment_start_time = Some("77".into());

        HeaderPatch::new()
            .merged_level(2)
            .segment_start_age(FieldUpdate::Set(1))
            .segment_start_time(FieldUpdate::Delete)
            .apply(&mut h)
            .unwrap();

        assert_eq!(h.merged_level, 2);
        assert_eq!(h.segment_start_age, Some(1));
        assert_eq!(h.segment_start_time, None);
        assert_eq!(h.age, Some(4));
    }

    #[test]
    fn patch_rejects_level_regression() {
        let mut h = header();
        h.merged_level = 3;
        let result = HeaderPatch::new().merged_level(2).apply(&mut h);
        assert!(matches!(result, Err(StorageError::InvalidPatch { .. })));
        assert_eq!(h.merged_level, 3);
    }

    #[test]
    fn patch_rejects_status_regression() {
        let mut h = header();
        h.merge_status = MergeStatus::Merged;
        let result = HeaderPatch::new()
            .merge_status(MergeStatus::Initial)
            .apply(&mut h);
        assert!(result.is_err());

        let mut fresh = header();
        HeaderPatch::new()
            .merge_status(MergeStatus::Merged)
            .apply(&mut fresh)
            .unwrap();
        assert_eq!(fresh.merge_status, MergeStatus::Merged);
    }

    #[test]
    fn counters_accumulate() {
        let mut h = header();
        TableCounters::merged(100, 4).add_to(&mut h);
        TableCounters::merged(50, 1).add_to(&mut h);
        TableCounters::packaged(10, 2).add_to(&mut h);
        assert_eq!(
            h.counters(),
            TableCounters {
                merged_size: 150,
                merged_lines: 5,
                packaged_size: 10,
                packaged_lines: 2,
            }
        );
    }

    #[test]
    fn empty_patch_is_empty() {
        assert!(HeaderPatch::new().is_empty());
        assert!(!HeaderPatch::new().merged_level(1).is_empty());
    }
}
