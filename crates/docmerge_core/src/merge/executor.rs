//! Applying a merge plan: absorption or repacking.

use super::planner::MergeTask;
use crate::chunk::seal_block;
use crate::config::{Config, TOP_MERGE_LEVEL};
use crate::error::{CoreError, CoreResult};
use crate::flow::{clear_segment_markers, Flow, Span};
use docmerge_codec::{decode_block, Record};
use docmerge_storage::{
    DocRef, DocumentBackend, FieldUpdate, HeaderPatch, MergeStatus, TableContext, TableCounters,
};

/// Executes one planned level transition.
pub(crate) struct Executor<'a, B> {
    pub backend: &'a B,
    pub config: &'a Config,
    pub ctx: &'a TableContext,
    pub flow: Flow,
    pub target: u8,
}

/// What an execution did, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ExecutionSummary {
    pub repacked: bool,
    pub rewritten: usize,
    pub deleted: usize,
    pub segment_start: u128,
}

impl<B: DocumentBackend> Executor<'_, B> {
    /// Runs the merge. The leader's `merged_level` is patched last, so an
    /// interrupted run is replanned and finished by the next call.
    pub fn execute(&self, tasks: Vec<MergeTask>) -> CoreResult<ExecutionSummary> {
        let segment_start = tasks
            .iter()
            .filter_map(|task| task.range.map(|r| r.start))
            .min()
            .ok_or_else(|| CoreError::invalid_operation("merge plan without covered range"))?;

        let total: u64 = tasks.iter().map(|task| task.size).sum();
        let repack = total >= self.config.size_limit as u64
            || tasks.iter().any(|task| task.merged)
            || self.target == TOP_MERGE_LEVEL;

        if repack {
            self.repack(tasks, segment_start)
        } else {
            self.absorb(tasks, segment_start)
        }
    }

    /// Leader takes in every task's covered records; the rest are deleted.
    fn absorb(&self, tasks: Vec<MergeTask>, segment_start: u128) -> CoreResult<ExecutionSummary> {
        let mut records = Vec::new();
        for task in &tasks {
            records.extend(self.covered_records(task)?);
        }
        self.flow.sort(&mut records);
        let blob = seal_block(self.config, &mut records)?;

        let mut iter = tasks.into_iter();
        let leader = iter
            .next()
            .ok_or_else(|| CoreError::invalid_operation("merge plan without leader"))?;
        let leader_end = leader.range.map_or(segment_start, |r| r.end);

        let mut header = leader.header;
        self.flow
            .set_span(&mut header, Span::new(segment_start, leader_end))?;
        header.line_nb = records.len() as u64;
        header.data_size = blob.len() as u64;
        self.backend
            .update_document(self.ctx, leader.doc_ref, header, blob)?;

        let doomed: Vec<DocRef> = iter.map(|task| task.doc_ref).collect();
        self.delete(&doomed)?;
        self.finalize(leader.doc_ref, segment_start)?;

        Ok(ExecutionSummary {
            repacked: false,
            rewritten: 1,
            deleted: doomed.len(),
            segment_start,
        })
    }

    /// Rewrites tasks into `merged` documents bounded by `size_limit`.
    fn repack(
        &self,
        mut tasks: Vec<MergeTask>,
        segment_start: u128,
    ) -> CoreResult<ExecutionSummary> {
        let leader = tasks
            .first()
            .map(|task| task.doc_ref)
            .ok_or_else(|| CoreError::invalid_operation("merge plan without leader"))?;
        let mut summary = ExecutionSummary {
            repacked: true,
            segment_start,
            ..ExecutionSummary::default()
        };
        let half = self.config.size_limit as u64 / 2;
        let mut fresh = vec![false; tasks.len()];

        // Large tasks stand alone.
        for (idx, task) in tasks.iter_mut().enumerate() {
            if task.merged || task.size <= half || task.range.is_none() {
                continue;
            }
            self.rewrite(idx, std::slice::from_ref(&*task), &mut summary)?;
            task.merged = true;
            fresh[idx] = true;
        }

        // Greedy concatenation of the rest, newest first.
        let mut group: Vec<usize> = Vec::new();
        let mut group_size = 0u64;
        for (idx, task) in tasks.iter().enumerate() {
            if task.merged {
                self.flush(&tasks, &mut group, &mut summary)?;
                group_size = 0;
                if !fresh[idx] && idx != 0 {
                    self.promote(task)?;
                }
                continue;
            }
            if task.range.is_none() {
                if idx != 0 {
                    self.delete(&[task.doc_ref])?;
                    summary.deleted += 1;
                }
                continue;
            }
            if !group.is_empty() && group_size + task.size >= self.config.size_limit as u64 {
                self.flush(&tasks, &mut group, &mut summary)?;
                group_size = 0;
            }
            group.push(idx);
            group_size += task.size;
        }
        self.flush(&tasks, &mut group, &mut summary)?;

        self.finalize(leader, segment_start)?;
        Ok(summary)
    }

    /// Concatenates a buffered group into its first (newest) document.
    fn flush(
        &self,
        tasks: &[MergeTask],
        group: &mut Vec<usize>,
        summary: &mut ExecutionSummary,
    ) -> CoreResult<()> {
        let Some(&base) = group.first() else {
            return Ok(());
        };
        let members: Vec<MergeTask> = group.iter().map(|&idx| tasks[idx].clone()).collect();
        self.rewrite(base, &members, summary)?;

        let doomed: Vec<DocRef> = members[1..].iter().map(|task| task.doc_ref).collect();
        self.delete(&doomed)?;
        summary.deleted += doomed.len();
        group.clear();
        Ok(())
    }

    /// Writes the covered records of `members` into the first member's
    /// document as a `merged` document and folds its size into the table
    /// header. `base_idx` 0 is the leader, whose level is left to
    /// [`Self::finalize`].
    fn rewrite(
        &self,
        base_idx: usize,
        members: &[MergeTask],
        summary: &mut ExecutionSummary,
    ) -> CoreResult<()> {
        let base = &members[0];
        let mut records = Vec::new();
        let mut span: Option<Span> = None;
        for task in members {
            records.extend(self.covered_records(task)?);
            if let Some(range) = task.range {
                span = Some(match span {
                    Some(s) => Span::new(s.start.min(range.start), s.end.max(range.end)),
                    None => range,
                });
            }
        }
        let span = span.ok_or_else(|| CoreError::invalid_operation("rewrite without range"))?;
        self.flow.sort(&mut records);
        let blob = seal_block(self.config, &mut records)?;

        let mut header = base.header.clone();
        self.flow.set_span(&mut header, span)?;
        header.merge_status = MergeStatus::Merged;
        if base_idx != 0 {
            header.merged_level = header.merged_level.max(self.target);
        }
        clear_segment_markers(&mut header);
        header.line_nb = records.len() as u64;
        header.data_size = blob.len() as u64;

        let counters = if self.target < TOP_MERGE_LEVEL {
            TableCounters::merged(header.data_size, header.line_nb)
        } else {
            TableCounters::packaged(header.data_size, header.line_nb)
        };
        self.backend
            .update_document(self.ctx, base.doc_ref, header, blob)?;
        self.fold(counters)?;

        summary.rewritten += 1;
        tracing::debug!(
            table = %self.ctx,
            doc_ref = %base.doc_ref,
            members = members.len(),
            start = %span.start,
            end = %span.end,
            "repacked document"
        );
        Ok(())
    }

    /// Lifts an already merged document to the target level.
    fn promote(&self, task: &MergeTask) -> CoreResult<()> {
        let header = &task.header;
        if header.merged_level >= self.target
            && header.segment_start_age.is_none()
            && header.segment_start_time.is_none()
        {
            return Ok(());
        }
        let patch = HeaderPatch::new()
            .merged_level(header.merged_level.max(self.target))
            .segment_start_age(FieldUpdate::Delete)
            .segment_start_time(FieldUpdate::Delete);
        self.backend.update_header(self.ctx, task.doc_ref, &patch)?;
        Ok(())
    }

    /// Records the segment start on the leader and advances its level.
    fn finalize(&self, leader: DocRef, segment_start: u128) -> CoreResult<()> {
        let patch = self
            .flow
            .segment_marker(segment_start)?
            .merged_level(self.target);
        self.backend.update_header(self.ctx, leader, &patch)?;
        Ok(())
    }

    fn covered_records(&self, task: &MergeTask) -> CoreResult<Vec<Record>> {
        let Some(range) = task.range else {
            return Ok(Vec::new());
        };
        let blob = self.backend.get_blob(self.ctx, task.doc_ref)?;
        let mut covered = Vec::new();
        for record in decode_block(&blob)? {
            if range.contains(self.flow.position(&record)?) {
                covered.push(record);
            }
        }
        Ok(covered)
    }

    fn delete(&self, refs: &[DocRef]) -> CoreResult<()> {
        if !refs.is_empty() {
            self.backend.delete_documents(self.ctx, refs)?;
        }
        Ok(())
    }

    fn fold(&self, counters: TableCounters) -> CoreResult<()> {
        if self.backend.get_table_header(self.ctx)?.is_none() {
            tracing::debug!(table = %self.ctx, "no table header, counters not folded");
            return Ok(());
        }
        self.backend.inc_table_header(self.ctx, counters)?;
        Ok(())
    }
}
