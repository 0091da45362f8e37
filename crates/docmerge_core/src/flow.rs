//! The two ordering domains of a partition.
//!
//! Aged documents cover a range of `_AGE` generations, normal documents a
//! range of numeric `_SEQ` values. Planning and execution work on plain
//! `u128` positions so both flows share one coverage algorithm.

use crate::error::{CoreError, CoreResult};
use docmerge_codec::{sort_aged, sort_sequenced, Record};
use docmerge_storage::{FieldUpdate, Header, HeaderPatch};

/// Ordering domain of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flow {
    /// Ordered by `_AGE` generation.
    Aged,
    /// Ordered by `_SEQ` sequence.
    Normal,
}

/// Inclusive range of positions covered by a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// First covered position.
    pub start: u128,
    /// Last covered position.
    pub end: u128,
}

impl Span {
    /// Creates a span; `end` below `start` collapses to `start`.
    pub fn new(start: u128, end: u128) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    /// Whether `position` lies inside the span.
    pub fn contains(&self, position: u128) -> bool {
        self.start <= position && position <= self.end
    }
}

/// `_AGE` of a record as a generation number.
pub(crate) fn record_age(record: &Record) -> CoreResult<u64> {
    let age = record
        .age()
        .ok_or_else(|| CoreError::malformed_record("aged record without integer _AGE"))?;
    u64::try_from(age).map_err(|_| CoreError::malformed_record(format!("negative _AGE {age}")))
}

/// `_SEQ` of a record as a number.
pub(crate) fn record_seq(record: &Record) -> CoreResult<u128> {
    let seq = record
        .seq()
        .ok_or_else(|| CoreError::malformed_record("record without textual _SEQ"))?;
    parse_seq(seq).map_err(CoreError::malformed_record)
}

/// Parses a decimal sequence string.
pub(crate) fn parse_seq(seq: &str) -> Result<u128, String> {
    seq.parse::<u128>()
        .map_err(|e| format!("sequence {seq:?} is not a decimal number: {e}"))
}

impl Flow {
    /// Flow of a stored header: aged when it carries `age`, normal when it
    /// carries `start_seq`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MalformedHeader`] if the header carries neither.
    pub fn of(header: &Header) -> CoreResult<Self> {
        if header.age.is_some() {
            Ok(Flow::Aged)
        } else if header.start_seq.is_some() {
            Ok(Flow::Normal)
        } else {
            Err(CoreError::malformed_header(
                "header carries neither age nor start_seq",
            ))
        }
    }

    /// Positions covered by a stored header.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MalformedHeader`] if the fields this flow needs
    /// are missing or unparseable.
    pub fn span(self, header: &Header) -> CoreResult<Span> {
        match self {
            Flow::Aged => {
                let age = header
                    .age
                    .ok_or_else(|| CoreError::malformed_header("aged header without age"))?;
                let end = header.end_age.unwrap_or(age);
                Ok(Span::new(u128::from(age), u128::from(end)))
            }
            Flow::Normal => {
                let start = header
                    .start_seq
                    .as_deref()
                    .ok_or_else(|| CoreError::malformed_header("normal header without start_seq"))
                    .and_then(|seq| parse_seq(seq).map_err(CoreError::malformed_header))?;
                let end = match header.end_seq.as_deref() {
                    Some(seq) => parse_seq(seq).map_err(CoreError::malformed_header)?,
                    None => start,
                };
                Ok(Span::new(start, end))
            }
        }
    }

    /// Position of one record in this flow.
    pub(crate) fn position(self, record: &Record) -> CoreResult<u128> {
        match self {
            Flow::Aged => record_age(record).map(u128::from),
            Flow::Normal => record_seq(record),
        }
    }

    /// Sorts records into this flow's stored order.
    pub(crate) fn sort(self, records: &mut [Record]) {
        match self {
            Flow::Aged => sort_aged(records),
            Flow::Normal => sort_sequenced(records),
        }
    }

    /// Rewrites the covered range of a header.
    pub(crate) fn set_span(self, header: &mut Header, span: Span) -> CoreResult<()> {
        match self {
            Flow::Aged => {
                header.age = Some(to_age(span.start)?);
                header.end_age = Some(to_age(span.end)?);
            }
            Flow::Normal => {
                header.start_seq = Some(span.start.to_string());
                header.end_seq = Some(span.end.to_string());
            }
        }
        Ok(())
    }

    /// Patch recording where the segment a leader stands for begins.
    pub(crate) fn segment_marker(self, start: u128) -> CoreResult<HeaderPatch> {
        Ok(match self {
            Flow::Aged => HeaderPatch::new().segment_start_age(FieldUpdate::Set(to_age(start)?)),
            Flow::Normal => {
                HeaderPatch::new().segment_start_time(FieldUpdate::Set(start.to_string()))
            }
        })
    }
}

/// Drops both segment markers from a header.
pub(crate) fn clear_segment_markers(header: &mut Header) {
    header.segment_start_age = None;
    header.segment_start_time = None;
}

fn to_age(position: u128) -> CoreResult<u64> {
    u64::try_from(position)
        .map_err(|_| CoreError::invalid_operation(format!("age {position} out of range")))
}
