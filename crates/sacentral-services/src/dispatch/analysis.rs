use async_trait::async_trait;
use chrono::Utc;

use sacentral_core::messages::{AnalysisPayload, EngineRule};
use sacentral_core::models::{
    RuleTemplateSnapshot, Stage, Task, TaskKind, Workflow, WorkflowStatus,
};
use sacentral_core::{AppError, EngineRequest};
use sacentral_db::AnalysisBinding;
use sacentral_worker::BrokerExt;

use super::{DispatchOutcome, StageHandler};
use crate::context::PipelineContext;

/// Snapshots the rule set onto the task and sends the compiled artifact to
/// the SA and/or ML engine.
///
/// An empty rule set ends the workflow here: no engine is ever contacted.
pub struct AnalysisHandler;

impl AnalysisHandler {
    async fn load_rules(
        ctx: &PipelineContext,
        workflow: &Workflow,
    ) -> Result<Option<RuleTemplateSnapshot>, AppError> {
        let template_id = workflow.rule_template_id.ok_or_else(|| {
            AppError::InvalidInput(format!("workflow {} has no rule template", workflow.id))
        })?;

        let Some(template) = ctx.store.get_template(template_id).await? else {
            tracing::warn!(
                workflow_id = %workflow.id,
                rule_template_id = %template_id,
                "Rule template no longer exists"
            );
            return Ok(None);
        };

        let rules = ctx.store.active_rules(template.id).await?;
        if rules.is_empty() {
            return Ok(None);
        }
        Ok(Some(RuleTemplateSnapshot::capture(
            &template,
            &rules,
            Utc::now(),
        )))
    }

    /// Mark the required sub-pipelines exception-terminal and abort the workflow.
    async fn abort_without_rules(
        ctx: &PipelineContext,
        workflow: &Workflow,
        task: &Task,
        kind: TaskKind,
    ) -> Result<DispatchOutcome, AppError> {
        let now = Utc::now();

        if !task.sa.status.is_terminal() {
            let sa = task.sa.finished(false, Vec::new(), 0, now)?;
            ctx.store.transition_sa(task.id, task.sa.status, &sa).await?;
        }
        if kind.includes_ml() && !task.ml.status.is_terminal() {
            let ml = task.ml.finished(false, None, now)?;
            ctx.store.transition_ml(task.id, task.ml.status, &ml).await?;
        }
        ctx.store
            .finish_workflow(workflow.id, WorkflowStatus::Aborted)
            .await?;

        tracing::warn!(
            workflow_id = %workflow.id,
            task_id = %task.id,
            "No active rules, analysis aborted before contacting any engine"
        );
        Ok(DispatchOutcome::Aborted)
    }
}

#[async_trait]
impl StageHandler for AnalysisHandler {
    fn stage(&self) -> Stage {
        Stage::Analysis
    }

    #[tracing::instrument(skip(self, ctx, workflow), fields(workflow_id = %workflow.id, task_id = %workflow.task_id))]
    async fn dispatch(
        &self,
        ctx: &PipelineContext,
        workflow: &Workflow,
    ) -> Result<DispatchOutcome, AppError> {
        let task = ctx
            .store
            .get_task(workflow.task_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task {}", workflow.task_id)))?;

        if task.rule_snapshot.is_some() {
            tracing::info!(task_id = %task.id, "Analysis already dispatched, skipping");
            return Ok(DispatchOutcome::AlreadyDispatched);
        }

        let kind = workflow.workflow_type.task_kind().ok_or_else(|| {
            AppError::Internal(format!(
                "workflow type {} has no analysis stage",
                workflow.workflow_type
            ))
        })?;

        let Some(snapshot) = Self::load_rules(ctx, workflow).await? else {
            return Self::abort_without_rules(ctx, workflow, &task, kind).await;
        };

        let object_key = task.target_object_key.as_deref().ok_or_else(|| {
            AppError::InvalidInput(format!("task {} has no compiled artifact", task.id))
        })?;
        let url = ctx.blobs.presigned_url(object_key, ctx.url_expiry).await?;

        let now = Utc::now();
        let sa = if kind.includes_sa() {
            task.sa.started(now)?
        } else {
            task.sa.clone()
        };
        let ml = if kind.includes_ml() {
            task.ml.started(now)?
        } else {
            task.ml.clone()
        };

        let binding = AnalysisBinding {
            kind,
            snapshot,
            sa,
            ml,
        };
        if !ctx.store.bind_analysis(task.id, &binding).await? {
            tracing::info!(task_id = %task.id, "Rule snapshot already bound, skipping dispatch");
            return Ok(DispatchOutcome::AlreadyDispatched);
        }

        let payload = AnalysisPayload {
            workflow_id: workflow.id,
            task_id: task.id,
            source: url,
            filename: task.target_object_name.clone(),
            rules: binding.snapshot.rules.iter().map(EngineRule::from).collect(),
            max_memory: workflow.limits.max_memory_gb,
            timeout: workflow.limits.timeout_minutes,
        };

        let mut requests = Vec::with_capacity(2);
        if kind.includes_sa() {
            requests.push(EngineRequest::SaAnalyze(payload.clone()));
        }
        if kind.includes_ml() {
            requests.push(EngineRequest::MlAnalyze(payload));
        }

        let mut queues = Vec::with_capacity(requests.len());
        for request in &requests {
            ctx.broker.send_request(request).await?;
            queues.push(request.queue());
        }

        tracing::info!(
            workflow_id = %workflow.id,
            task_id = %task.id,
            kind = %kind,
            rules = binding.snapshot.rules.len(),
            "Analysis requested"
        );
        Ok(DispatchOutcome::Dispatched(queues))
    }
}
