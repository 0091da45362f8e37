//! Backward walk assembling the documents one level transition consumes.

use crate::error::CoreResult;
use crate::flow::{Flow, Span};
use crate::ingest::TABLE_HEADER_AGE;
use docmerge_storage::{DocRef, DocumentBackend, Header, MergeStatus, StreamQuery, TableContext};
use std::fmt;

/// One document taking part in a merge.
#[derive(Debug, Clone)]
pub(crate) struct MergeTask {
    pub doc_ref: DocRef,
    pub header: Header,
    /// Positions this document contributes; `None` when everything it
    /// holds is already covered by newer tasks.
    pub range: Option<Span>,
    /// Already repacked; never rewritten again.
    pub merged: bool,
    /// Compressed body size.
    pub size: u64,
}

impl MergeTask {
    fn new(doc_ref: DocRef, header: Header, range: Option<Span>, merged: bool) -> Self {
        let size = header.data_size;
        Self {
            doc_ref,
            header,
            range,
            merged,
            size,
        }
    }
}

/// Why a merge cannot run right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NotReady {
    /// An older document has not been compacted to `target - 1` yet.
    Dependency {
        doc_ref: DocRef,
        merged_level: u8,
    },
    /// An older document ends before the covered range begins.
    Gap { covered_from: u128, older_end: u128 },
    /// The stream ended before coverage reached the first generation.
    OriginUnreached { covered_from: u128 },
    /// An older document belongs to the other flow.
    MixedFlow { doc_ref: DocRef },
}

impl fmt::Display for NotReady {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotReady::Dependency {
                doc_ref,
                merged_level,
            } => write!(f, "dependency {doc_ref} only merged to level {merged_level}"),
            NotReady::Gap {
                covered_from,
                older_end,
            } => write!(
                f,
                "coverage gap: older document ends at {older_end}, coverage starts at {covered_from}"
            ),
            NotReady::OriginUnreached { covered_from } => {
                write!(f, "coverage starts at {covered_from} and no older document exists")
            }
            NotReady::MixedFlow { doc_ref } => write!(f, "{doc_ref} belongs to the other flow"),
        }
    }
}

/// Result of planning.
#[derive(Debug)]
pub(crate) enum PlanOutcome {
    /// Newest-first task list; the leader is the first task.
    Ready(Vec<MergeTask>),
    /// Nothing may be written.
    NotReady(NotReady),
}

/// Whether a document ending at `end` leaves no hole before `cursor`.
fn reaches(end: u128, cursor: u128) -> bool {
    end.saturating_add(1) >= cursor
}

/// A hole between an older document and the covered range. Only aged
/// generations are dense; sequence numbers may skip values between
/// batches.
fn gap(flow: Flow, end: u128, cursor: u128) -> Option<NotReady> {
    (flow == Flow::Aged && !reaches(end, cursor)).then_some(NotReady::Gap {
        covered_from: cursor,
        older_end: end,
    })
}

/// Plans the merge of `leader` to level `target`.
///
/// Walks the stream strictly older than the leader, newest first,
/// narrowing a cursor (the first position covered so far) until a
/// document of level `target` or higher, the table header, or the end of
/// the stream is met. Aged coverage must be contiguous; normal documents
/// only need to be older than the cursor.
pub(crate) fn plan<B: DocumentBackend>(
    backend: &B,
    ctx: &TableContext,
    flow: Flow,
    leader_ref: DocRef,
    leader: &Header,
    target: u8,
) -> CoreResult<PlanOutcome> {
    let leader_span = flow.span(leader)?;
    let mut cursor = leader_span.start;
    let mut tasks = vec![MergeTask::new(
        leader_ref,
        leader.clone(),
        Some(leader_span),
        leader.merge_status == MergeStatus::Merged,
    )];

    let query = StreamQuery::older_than(leader.sort_key.clone());
    for doc_ref in backend.get_stream_by_sort_key(ctx, &query)? {
        let Some(header) = backend.get_header_from_ref(ctx, doc_ref)? else {
            continue;
        };

        if header.is_table_header() {
            if let Some(reason) = gap(flow, u128::from(TABLE_HEADER_AGE), cursor) {
                return Ok(PlanOutcome::NotReady(reason));
            }
            tracing::debug!(table = %ctx, tasks = tasks.len(), "plan reached table header");
            return Ok(PlanOutcome::Ready(tasks));
        }

        if Flow::of(&header).ok() != Some(flow) {
            return Ok(PlanOutcome::NotReady(NotReady::MixedFlow { doc_ref }));
        }
        let span = flow.span(&header)?;

        if header.merge_level >= target {
            if let Some(reason) = gap(flow, span.end, cursor) {
                return Ok(PlanOutcome::NotReady(reason));
            }
            tracing::debug!(
                table = %ctx,
                boundary = %doc_ref,
                tasks = tasks.len(),
                "plan reached level boundary"
            );
            return Ok(PlanOutcome::Ready(tasks));
        }

        if header.merged_level.saturating_add(1) < target {
            return Ok(PlanOutcome::NotReady(NotReady::Dependency {
                doc_ref,
                merged_level: header.merged_level,
            }));
        }
        if let Some(reason) = gap(flow, span.end, cursor) {
            return Ok(PlanOutcome::NotReady(reason));
        }

        let range = (span.start < cursor).then(|| Span::new(span.start, span.end.min(cursor - 1)));
        let obsolete = span.end >= cursor;
        let merged = header.merge_status == MergeStatus::Merged && !obsolete;
        tasks.push(MergeTask::new(doc_ref, header, range, merged));
        cursor = cursor.min(span.start);
    }

    match flow {
        Flow::Aged if cursor > u128::from(TABLE_HEADER_AGE) => Ok(PlanOutcome::NotReady(
            NotReady::OriginUnreached {
                covered_from: cursor,
            },
        )),
        _ => Ok(PlanOutcome::Ready(tasks)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmerge_storage::InMemoryBackend;

    fn ctx() -> TableContext {
        TableContext::new("topic", "table")
    }

    fn setup() -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        backend.prepare_table(&ctx()).unwrap();
        let mut header = Header::for_table(&ctx()).with_ages(1, 1);
        header.merge_status = MergeStatus::Header;
        header.merge_level = 9;
        backend.add_document(&ctx(), header, vec![]).unwrap();
        backend
    }

    fn aged(backend: &InMemoryBackend, age: u64, end: u64, level: u8, merged: u8) -> DocRef {
        let mut header = Header::for_table(&ctx()).with_ages(age, end);
        header.sort_key = format!("{end:020}");
        header.merge_key = Some(end.to_string());
        header.merge_level = level;
        header.merged_level = merged;
        header.data_size = 10;
        backend.add_document(&ctx(), header, vec![]).unwrap().0
    }

    fn run(backend: &InMemoryBackend, leader: DocRef, target: u8) -> PlanOutcome {
        let header = backend.get_header_from_ref(&ctx(), leader).unwrap().unwrap();
        plan(backend, &ctx(), Flow::Aged, leader, &header, target).unwrap()
    }

    fn ranges(outcome: PlanOutcome) -> Vec<Option<(u128, u128)>> {
        match outcome {
            PlanOutcome::Ready(tasks) => tasks
                .iter()
                .map(|t| t.range.map(|r| (r.start, r.end)))
                .collect(),
            PlanOutcome::NotReady(reason) => panic!("not ready: {reason}"),
        }
    }

    #[test]
    fn walks_back_to_table_header() {
        let backend = setup();
        aged(&backend, 2, 3, 0, 0);
        aged(&backend, 4, 6, 0, 0);
        let leader = aged(&backend, 7, 9, 1, 0);

        assert_eq!(
            ranges(run(&backend, leader, 1)),
            vec![Some((7, 9)), Some((4, 6)), Some((2, 3))]
        );
    }

    #[test]
    fn stops_at_level_boundary() {
        let backend = setup();
        aged(&backend, 2, 3, 0, 0);
        aged(&backend, 4, 6, 2, 0);
        let leader = aged(&backend, 7, 9, 1, 0);

        assert_eq!(ranges(run(&backend, leader, 1)), vec![Some((7, 9))]);
    }

    #[test]
    fn gap_is_not_ready() {
        let backend = setup();
        aged(&backend, 2, 3, 0, 0);
        let leader = aged(&backend, 5, 9, 1, 0);

        assert!(matches!(
            run(&backend, leader, 1),
            PlanOutcome::NotReady(NotReady::Gap {
                covered_from: 5,
                older_end: 3
            })
        ));
    }

    #[test]
    fn unmerged_dependency_is_not_ready() {
        let backend = setup();
        let older = aged(&backend, 2, 3, 1, 0);
        let leader = aged(&backend, 4, 9, 2, 1);

        match run(&backend, leader, 2) {
            PlanOutcome::NotReady(NotReady::Dependency { doc_ref, .. }) => {
                assert_eq!(doc_ref, older);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn overlapping_documents_are_trimmed() {
        let backend = setup();
        aged(&backend, 2, 4, 0, 0);
        aged(&backend, 5, 7, 0, 0);
        // leader already absorbed 5..=7
        let leader = aged(&backend, 5, 9, 1, 0);

        assert_eq!(
            ranges(run(&backend, leader, 1)),
            vec![Some((5, 9)), None, Some((2, 4))]
        );
    }

    #[test]
    fn missing_origin_is_not_ready() {
        let backend = InMemoryBackend::new();
        backend.prepare_table(&ctx()).unwrap();
        let leader = aged(&backend, 2, 3, 1, 0);

        assert!(matches!(
            run(&backend, leader, 1),
            PlanOutcome::NotReady(NotReady::OriginUnreached { covered_from: 2 })
        ));
    }

    fn normal(backend: &InMemoryBackend, start: u64, end: u64, level: u8) -> (DocRef, Header) {
        let mut header = Header::for_table(&ctx()).with_start_seq(start.to_string());
        header.end_seq = Some(end.to_string());
        header.sort_key = format!("{start:040}");
        header.merge_key = Some(start.to_string());
        header.merge_level = level;
        header.data_size = 10;
        backend.add_document(&ctx(), header, vec![]).unwrap()
    }

    #[test]
    fn sequence_holes_are_not_gaps() {
        let backend = InMemoryBackend::new();
        backend.prepare_table(&ctx()).unwrap();
        normal(&backend, 1000, 1009, 0);
        normal(&backend, 1500, 1504, 0);
        let (leader_ref, leader) = normal(&backend, 2000, 2009, 1);

        let outcome = plan(&backend, &ctx(), Flow::Normal, leader_ref, &leader, 1).unwrap();
        assert_eq!(
            ranges(outcome),
            vec![Some((2000, 2009)), Some((1500, 1504)), Some((1000, 1009))]
        );
    }

    #[test]
    fn sequence_holes_before_boundary_are_not_gaps() {
        let backend = InMemoryBackend::new();
        backend.prepare_table(&ctx()).unwrap();
        normal(&backend, 1000, 1009, 2);
        let (leader_ref, leader) = normal(&backend, 2000, 2009, 1);

        let outcome = plan(&backend, &ctx(), Flow::Normal, leader_ref, &leader, 1).unwrap();
        assert_eq!(ranges(outcome), vec![Some((2000, 2009))]);
    }

    #[test]
    fn normal_flow_needs_no_origin() {
        let backend = InMemoryBackend::new();
        backend.prepare_table(&ctx()).unwrap();
        let mut older = Header::for_table(&ctx()).with_start_seq("10");
        older.end_seq = Some("19".into());
        older.sort_key = "a".into();
        older.merge_key = Some("10".into());
        backend.add_document(&ctx(), older, vec![]).unwrap();

        let mut leader = Header::for_table(&ctx()).with_start_seq("20");
        leader.end_seq = Some("29".into());
        leader.sort_key = "b".into();
        leader.merge_key = Some("20".into());
        leader.merge_level = 1;
        let (leader_ref, leader) = backend.add_document(&ctx(), leader, vec![]).unwrap();

        match plan(&backend, &ctx(), Flow::Normal, leader_ref, &leader, 1).unwrap() {
            PlanOutcome::Ready(tasks) => assert_eq!(tasks.len(), 2),
            PlanOutcome::NotReady(reason) => panic!("not ready: {reason}"),
        }
    }
}
