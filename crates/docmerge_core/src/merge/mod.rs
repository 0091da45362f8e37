//! Leveled compaction.
//!
//! `merge_documents(ctx, key, target)` moves the document owning `key`
//! from `merged_level = target - 1` to `target`:
//!
//! 1. The planner walks older documents back to the previous document of
//!    level `target` or higher (or the table header), checking that every
//!    one of them reached `target - 1` and that their ranges leave no gap.
//! 2. The executor either lets the leader absorb them in place, or
//!    repacks everything into `merged` documents below `size_limit`.
//! 3. The leader's `merged_level` is patched last. Until then a rerun
//!    replans from the current state; documents already covered by the
//!    leader show up as zero-length tasks and are deleted.

mod executor;
mod locks;
mod planner;

pub(crate) use locks::MergeLocks;

use crate::engine::Engine;
use crate::error::{CoreError, CoreResult};
use crate::flow::Flow;
use docmerge_storage::{DocumentBackend, TableContext};
use executor::Executor;
use planner::{plan, PlanOutcome};

impl<B: DocumentBackend> Engine<B> {
    /// Compacts the document owning `merge_key` to level `target`.
    ///
    /// Returns `Ok(true)` once the document is at `target` (including when
    /// it already was; nothing is written then) and `Ok(false)` when the
    /// merge cannot run yet: the key is unknown, the document is not at
    /// `target - 1`, an older document is not compacted far enough, or
    /// coverage has a gap. Nothing is written in the `false` cases.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if `target` exceeds the
    /// configured maximum, and fatal storage or codec errors.
    pub fn merge_documents(
        &self,
        ctx: &TableContext,
        merge_key: &str,
        target: u8,
    ) -> CoreResult<bool> {
        if target > self.config.max_merge_level {
            return Err(CoreError::invalid_operation(format!(
                "merge target {target} exceeds level {}",
                self.config.max_merge_level
            )));
        }
        self.locks
            .with_lock(ctx, merge_key, || self.merge_locked(ctx, merge_key, target))
    }

    fn merge_locked(&self, ctx: &TableContext, merge_key: &str, target: u8) -> CoreResult<bool> {
        let Some(leader_ref) = self.backend.get_ref_by_merge_key(ctx, merge_key)? else {
            tracing::warn!(table = %ctx, merge_key, "merge skipped: no document owns this key");
            return Ok(false);
        };
        let Some(leader) = self.backend.get_header_from_ref(ctx, leader_ref)? else {
            tracing::warn!(table = %ctx, merge_key, %leader_ref, "merge skipped: document vanished");
            return Ok(false);
        };
        if leader.is_table_header() {
            tracing::warn!(table = %ctx, merge_key, "merge skipped: table header is never merged");
            return Ok(false);
        }

        if leader.merged_level >= target {
            tracing::debug!(
                table = %ctx,
                merge_key,
                merged_level = leader.merged_level,
                target,
                "already merged"
            );
            return Ok(true);
        }
        if leader.merged_level + 1 < target {
            tracing::warn!(
                table = %ctx,
                merge_key,
                merged_level = leader.merged_level,
                target,
                "merge skipped: document must be merged one level at a time"
            );
            return Ok(false);
        }

        let flow = Flow::of(&leader)?;
        let tasks = match plan(&self.backend, ctx, flow, leader_ref, &leader, target)? {
            PlanOutcome::Ready(tasks) => tasks,
            PlanOutcome::NotReady(reason) => {
                tracing::warn!(table = %ctx, merge_key, target, %reason, "merge not ready");
                return Ok(false);
            }
        };

        let task_count = tasks.len();
        let executor = Executor {
            backend: &self.backend,
            config: &self.config,
            ctx,
            flow,
            target,
        };
        let summary = executor.execute(tasks)?;
        tracing::info!(
            table = %ctx,
            merge_key,
            target,
            tasks = task_count,
            repacked = summary.repacked,
            rewritten = summary.rewritten,
            deleted = summary.deleted,
            segment_start = %summary.segment_start,
            "merged documents"
        );
        Ok(true)
    }
}
