use chrono::Utc;

use sacentral_core::messages::MlFinished;
use sacentral_core::AppError;

use super::CompletionProcessor;

impl CompletionProcessor {
    #[tracing::instrument(skip(self, message), fields(workflow_id = %message.workflow_id, task_id = %message.task_id, success = message.success))]
    pub(crate) async fn on_ml_finished(&self, message: MlFinished) -> Result<(), AppError> {
        let Some((workflow, task)) = self
            .resolve_analysis(message.workflow_id, message.task_id)
            .await?
        else {
            return Ok(());
        };

        if !task.runs_ml() {
            tracing::warn!(kind = ?task.kind, "Task does not run ML, dropping result");
            return Ok(());
        }
        if task.ml.status.is_terminal() {
            tracing::info!(status = %task.ml.status, "ML already finished, result not stored again");
            return self.resettle(workflow, &task).await;
        }

        let files = message.result.as_ref().map(|r| r.len()).unwrap_or(0);
        let raw_result = if message.success { message.result } else { None };

        let from = task.ml.status;
        let next = match task.ml.finished(message.success, raw_result, Utc::now()) {
            Ok(next) => next,
            Err(e) => {
                tracing::warn!(error = %e, "ML result rejected by sub-pipeline state");
                return Ok(());
            }
        };

        if !self.ctx.store.transition_ml(task.id, from, &next).await? {
            tracing::info!("ML finished concurrently, dropping duplicate");
            return Ok(());
        }

        tracing::info!(status = %next.status, files, "ML finished");
        self.settle_analysis(workflow, task.id).await
    }
}
