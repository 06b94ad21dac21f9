use async_trait::async_trait;

use sacentral_core::messages::CompilePayload;
use sacentral_core::models::{Stage, Workflow};
use sacentral_core::{AppError, EngineRequest};
use sacentral_worker::BrokerExt;

use super::{DispatchOutcome, StageHandler};
use crate::context::PipelineContext;

/// Sends the task's source artifact to the compiler.
pub struct CompileHandler;

#[async_trait]
impl StageHandler for CompileHandler {
    fn stage(&self) -> Stage {
        Stage::Compile
    }

    #[tracing::instrument(skip(self, ctx, workflow), fields(workflow_id = %workflow.id))]
    async fn dispatch(
        &self,
        ctx: &PipelineContext,
        workflow: &Workflow,
    ) -> Result<DispatchOutcome, AppError> {
        let code = ctx
            .store
            .get_code(workflow.code_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("code {}", workflow.code_id)))?;
        let source = ctx
            .store
            .get_file(code.source_file_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("source file {}", code.source_file_id)))?;

        let url = ctx
            .blobs
            .presigned_url(&source.object_key, ctx.url_expiry)
            .await?;

        let request = EngineRequest::Compile(CompilePayload {
            workflow_id: workflow.id,
            source: url,
            filename: source.name.clone(),
        });
        ctx.broker.send_request(&request).await?;

        tracing::info!(
            workflow_id = %workflow.id,
            filename = %source.name,
            "Compile requested"
        );
        Ok(DispatchOutcome::Dispatched(vec![request.queue()]))
    }
}
