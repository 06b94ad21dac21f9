//! Merge service: loads the stored SA and ML results of a task, runs the
//! correlation and writes the summary in a single store call.
//!
//! The automatic merge writes through `claim_merge`, so the claim and the
//! summary land together or not at all.

use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

use sacentral_core::models::{MlRawResult, SaResultWithFindings, SummaryResult, Task};
use sacentral_core::{merge, AppError, MergeError};

use crate::context::PipelineContext;

#[derive(Clone)]
pub struct MergeService {
    ctx: PipelineContext,
}

impl MergeService {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    /// SA results referenced by the task, in the order the SA pipeline recorded them.
    async fn load_sa_results(&self, task: &Task) -> Result<Vec<SaResultWithFindings>, AppError> {
        let mut by_id: HashMap<Uuid, SaResultWithFindings> = self
            .ctx
            .store
            .list_sa_results(task.id)
            .await?
            .into_iter()
            .map(|r| (r.result.id, r))
            .collect();

        Ok(task
            .sa
            .result_ids
            .iter()
            .filter_map(|id| by_id.remove(id))
            .collect())
    }

    /// Correlate the stored inputs of `task`. Pure over its arguments.
    fn summarize(
        &self,
        task: &Task,
        sa_results: &[SaResultWithFindings],
        ml_result: &MlRawResult,
    ) -> Result<(SummaryResult, u32), MergeError> {
        let records = merge(
            sa_results,
            ml_result,
            task.rule_snapshot.as_ref(),
            &self.ctx.thresholds,
        )?;
        tracing::debug!(
            task_id = %task.id,
            sa_groups = sa_results.len(),
            ml_files = ml_result.len(),
            records = records.len(),
            "Correlation computed"
        );
        let weakness_count = records.len() as u32;
        Ok((SummaryResult::from_results(records, Utc::now()), weakness_count))
    }

    /// Automatic merge once both sub-pipelines succeeded.
    ///
    /// The summary is computed first and written together with the merge
    /// claim, so an interrupted merge leaves the task unclaimed and a later
    /// delivery can run it again. Returns true when this call stored the
    /// summary. A failing correlation is logged and leaves the task as it was.
    #[tracing::instrument(skip(self, task), fields(task_id = %task.id))]
    pub async fn merge_once(&self, task: &Task) -> Result<bool, AppError> {
        if task.merge_claimed || !task.both_succeeded() {
            return Ok(false);
        }

        let sa_results = self.load_sa_results(task).await?;
        let ml_result = task.ml.raw_result.clone().unwrap_or_default();
        let (summary, weakness_count) = match self.summarize(task, &sa_results, &ml_result) {
            Ok(output) => output,
            Err(e) => {
                tracing::error!(error = %e, "Merge failed, summary left untouched");
                return Ok(false);
            }
        };

        let claimed = self
            .ctx
            .store
            .claim_merge(task.id, &summary, weakness_count)
            .await?;
        if claimed {
            tracing::info!(weakness_count, "Merge completed");
        } else {
            tracing::info!("Merge already recorded by a concurrent finisher");
        }
        Ok(claimed)
    }

    /// Manual re-merge of a task whose SA and ML sub-pipelines both succeeded.
    ///
    /// On any failure the stored summary is left as it was.
    #[tracing::instrument(skip(self), fields(task_id = %task_id))]
    pub async fn merge_task(&self, task_id: Uuid) -> Result<SummaryResult, AppError> {
        let task = self
            .ctx
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task {}", task_id)))?;

        if !task.both_succeeded() {
            return Err(AppError::EngineNotReady(format!(
                "task {} needs successful SA and ML results before merging (sa: {}, ml: {})",
                task.id, task.sa.status, task.ml.status
            )));
        }

        let sa_results = self.load_sa_results(&task).await?;
        let ml_result = task.ml.raw_result.clone().unwrap_or_default();
        let (summary, weakness_count) = self
            .summarize(&task, &sa_results, &ml_result)
            .map_err(|e| AppError::InternalWithSource {
                message: format!("Merge of task {} failed", task.id),
                source: e.into(),
            })?;
        self.ctx
            .store
            .store_summary(task.id, &summary, weakness_count)
            .await?;

        tracing::info!(weakness_count, "Re-merge completed");
        Ok(summary)
    }
}
