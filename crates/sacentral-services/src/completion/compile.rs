use chrono::Utc;

use sacentral_core::messages::CompileFinished;
use sacentral_core::models::{
    Stage, StoredFile, WorkflowStatus, COMPILED_FOLDER, COMPILED_SA_PROGRESS,
};
use sacentral_core::AppError;

use super::CompletionProcessor;

impl CompletionProcessor {
    #[tracing::instrument(skip(self, message), fields(workflow_id = %message.workflow_id, success = message.success))]
    pub(crate) async fn on_compile_finished(
        &self,
        message: CompileFinished,
    ) -> Result<(), AppError> {
        let store = &self.ctx.store;

        let Some(workflow) = store.get_workflow(message.workflow_id).await? else {
            tracing::info!("Workflow not found, dropping compile result");
            return Ok(());
        };
        if !workflow.is_running() || workflow.is_fully_progressed() {
            tracing::info!(status = %workflow.status, progress = workflow.progress, "Workflow already settled, dropping compile result");
            return Ok(());
        }
        if workflow.next_stage() != Some(Stage::Compile) {
            tracing::info!(progress = workflow.progress, "Compile stage already done, dropping compile result");
            return Ok(());
        }

        if !message.success {
            tracing::warn!("Compile failed");
            return self.finish(workflow.id, WorkflowStatus::Aborted).await;
        }

        let artifact = message.compile_result.ok_or_else(|| {
            AppError::InvalidMessage("successful compile-finish without compileResult".to_string())
        })?;
        let Some(task) = store.get_task(workflow.task_id).await? else {
            tracing::info!(task_id = %workflow.task_id, "Task not found, dropping compile result");
            return Ok(());
        };

        let sa_progress = workflow
            .workflow_type
            .runs_sa()
            .then_some(COMPILED_SA_PROGRESS);
        if !store
            .set_compiled_target(task.id, &artifact.name, &artifact.object_key, sa_progress)
            .await?
        {
            tracing::warn!(
                task_id = %task.id,
                object_key = %artifact.object_key,
                "Task already bound to another compiled artifact, dropping compile result"
            );
            return Ok(());
        }

        let file = StoredFile::new(
            artifact.name.clone(),
            artifact.size,
            artifact.md5.clone(),
            artifact.object_key.clone(),
            COMPILED_FOLDER,
        );
        if !store.register_compiled(task.code_id, &file).await? {
            tracing::debug!(object_key = %artifact.object_key, "Compiled artifact already registered");
        }

        let Some(advanced) = store.advance_workflow(workflow.id, Utc::now()).await? else {
            tracing::info!("Workflow advanced concurrently, dropping compile result");
            return Ok(());
        };

        tracing::info!(
            task_id = %task.id,
            object_key = %artifact.object_key,
            progress = advanced.progress,
            steps = advanced.steps,
            "Compile finished"
        );

        if advanced.is_fully_progressed() {
            return self.finish(advanced.id, WorkflowStatus::Complete).await;
        }
        self.chain(&advanced).await
    }
}
