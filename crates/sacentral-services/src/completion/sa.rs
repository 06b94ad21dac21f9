use chrono::Utc;
use uuid::Uuid;

use sacentral_core::messages::SaFinished;
use sacentral_core::models::{DetectedResult, SaResult, SaResultWithFindings};
use sacentral_core::AppError;

use super::CompletionProcessor;

/// Turn the engine's per-rule report into grouping records with their findings.
pub(crate) fn build_sa_results(task_id: Uuid, message: &SaFinished) -> Vec<SaResultWithFindings> {
    let Some(result) = &message.result else {
        return Vec::new();
    };

    result
        .iter()
        .map(|(rule_id, rule)| {
            let detected_results: Vec<DetectedResult> = rule
                .detected_results
                .iter()
                .map(|finding| {
                    DetectedResult::new(
                        task_id,
                        finding.source_sig.clone(),
                        finding.sink_sig.clone(),
                        finding.path.clone(),
                    )
                })
                .collect();

            SaResultWithFindings {
                result: SaResult {
                    id: Uuid::new_v4(),
                    task_id,
                    rule_id: rule_id.clone(),
                    rule_name: rule.rule_name.clone(),
                    rule_cwe: rule.rule_cwe.clone(),
                    rule_category: rule.rule_category.clone(),
                    rule_level: rule.rule_level,
                    detected_result_ids: detected_results.iter().map(|d| d.id).collect(),
                },
                detected_results,
            }
        })
        .collect()
}

impl CompletionProcessor {
    #[tracing::instrument(skip(self, message), fields(workflow_id = %message.workflow_id, task_id = %message.task_id, success = message.success))]
    pub(crate) async fn on_sa_finished(&self, message: SaFinished) -> Result<(), AppError> {
        let Some((workflow, task)) = self
            .resolve_analysis(message.workflow_id, message.task_id)
            .await?
        else {
            return Ok(());
        };

        if !task.runs_sa() {
            tracing::warn!(kind = ?task.kind, "Task does not run SA, dropping result");
            return Ok(());
        }
        if task.sa.status.is_terminal() {
            tracing::info!(status = %task.sa.status, "SA already finished, findings not persisted again");
            return self.resettle(workflow, &task).await;
        }

        let groups = if message.success {
            build_sa_results(task.id, &message)
        } else {
            Vec::new()
        };
        let result_ids: Vec<_> = groups.iter().map(|g| g.result.id).collect();
        let weakness_count: u32 = groups
            .iter()
            .map(|g| g.detected_results.len() as u32)
            .sum();

        let from = task.sa.status;
        let next = match task
            .sa
            .finished(message.success, result_ids.clone(), weakness_count, Utc::now())
        {
            Ok(next) => next,
            Err(e) => {
                tracing::warn!(error = %e, "SA result rejected by sub-pipeline state");
                return Ok(());
            }
        };

        if !groups.is_empty() {
            self.ctx.store.insert_sa_results(task.id, &groups).await?;
        }
        if !self.ctx.store.transition_sa(task.id, from, &next).await? {
            if !result_ids.is_empty() {
                self.ctx.store.delete_sa_results(task.id, &result_ids).await?;
            }
            tracing::info!("SA finished concurrently, dropping duplicate");
            return Ok(());
        }

        tracing::info!(
            status = %next.status,
            rules = result_ids.len(),
            reported = message.finding_count(),
            weakness_count,
            "SA finished"
        );
        self.settle_analysis(workflow, task.id).await
    }
}
