//! Workflow service: start workflows, replay merges, record audits, and read
//! tasks and workflows back.

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use sacentral_core::models::{
    Audit, AuditLevel, CodeData, DetectedResult, EngineLimits, HandleType, RuleTemplate,
    SaResultWithFindings, StoredFile, SummaryResult, Task, Workflow, WorkflowStatus,
    WorkflowType,
};
use sacentral_core::AppError;

use crate::context::PipelineContext;
use crate::dispatch::next_handler;
use crate::merge::MergeService;

const SOURCE_FOLDER: &str = "source";

/// Submission of a new workflow for a code artifact.
#[derive(Debug, Clone)]
pub struct StartWorkflow {
    pub code_id: Uuid,
    /// `None` picks the shape from the code: full pipeline when it is not yet
    /// compiled, analysis only when it is.
    pub workflow_type: Option<WorkflowType>,
    pub trigger: String,
    pub rule_template_id: Option<Uuid>,
    pub limits: Option<EngineLimits>,
}

/// A source archive already placed in the blob store.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterCode {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub size: u64,
    #[validate(length(min = 1, max = 64))]
    pub md5: String,
    #[validate(length(min = 1, max = 1024))]
    pub object_key: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AuditRequest {
    pub handle_type: HandleType,
    pub audit_level: AuditLevel,
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub memo: String,
}

#[derive(Clone)]
pub struct WorkflowService {
    ctx: PipelineContext,
    merge: MergeService,
}

impl WorkflowService {
    pub fn new(ctx: PipelineContext) -> Self {
        let merge = MergeService::new(ctx.clone());
        Self { ctx, merge }
    }

    /// Register an uploaded source archive as a code record.
    pub async fn register_code(&self, request: RegisterCode) -> Result<CodeData, AppError> {
        request.validate()?;
        if !self.ctx.blobs.exists(&request.object_key).await? {
            return Err(AppError::NotFound(format!("object {}", request.object_key)));
        }

        let file = StoredFile::new(
            request.name.clone(),
            request.size,
            request.md5,
            request.object_key,
            SOURCE_FOLDER,
        );
        let code = CodeData::new(request.name, file.id);
        self.ctx.store.create_code(&code, &file).await?;

        tracing::info!(code_id = %code.id, source_file_id = %file.id, "Code registered");
        Ok(code)
    }

    async fn resolve_template(
        &self,
        rule_template_id: Option<Uuid>,
    ) -> Result<RuleTemplate, AppError> {
        match rule_template_id {
            Some(id) => {
                let template = self
                    .ctx
                    .store
                    .get_template(id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("rule template {}", id)))?;
                if !template.enabled {
                    return Err(AppError::InvalidInput(format!(
                        "rule template {} is disabled",
                        id
                    )));
                }
                Ok(template)
            }
            None => self.ctx.store.default_template().await?.ok_or_else(|| {
                AppError::InvalidInput(
                    "no rule template given and no default template is configured".to_string(),
                )
            }),
        }
    }

    /// Create the workflow and its task together, then dispatch the first stage.
    #[tracing::instrument(skip(self, request), fields(code_id = %request.code_id))]
    pub async fn start_workflow(&self, request: StartWorkflow) -> Result<Workflow, AppError> {
        let code = self
            .ctx
            .store
            .get_code(request.code_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("code {}", request.code_id)))?;

        let workflow_type = request.workflow_type.unwrap_or(if code.is_compiled() {
            WorkflowType::SaMl
        } else {
            WorkflowType::CompileSaMl
        });

        let limits = request.limits.unwrap_or(self.ctx.default_limits);
        limits.validate()?;

        let (target_name, target_key) = if workflow_type.requires_compiled_input() {
            let compiled_id = code.compiled_file_id.ok_or_else(|| {
                AppError::InvalidInput(format!(
                    "code {} has no compiled artifact for a {} workflow",
                    code.id, workflow_type
                ))
            })?;
            let compiled = self
                .ctx
                .store
                .get_file(compiled_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("compiled file {}", compiled_id)))?;
            (compiled.name, Some(compiled.object_key))
        } else {
            (code.source_name.clone(), None)
        };

        let rule_template_id = if workflow_type.requires_rules() {
            Some(self.resolve_template(request.rule_template_id).await?.id)
        } else {
            None
        };

        let task = Task::new(
            code.id,
            request.trigger.clone(),
            target_name,
            target_key,
            workflow_type.task_kind(),
        );
        let workflow = Workflow::new(
            workflow_type,
            task.id,
            code.id,
            rule_template_id,
            request.trigger,
            limits,
        );
        self.ctx.store.create_workflow(&workflow, &task).await?;

        tracing::info!(
            workflow_id = %workflow.id,
            task_id = %task.id,
            workflow_type = %workflow_type,
            steps = workflow.steps,
            "Workflow started"
        );

        if let Some(handler) = next_handler(&workflow) {
            if let Err(e) = handler.dispatch(&self.ctx, &workflow).await {
                tracing::error!(
                    workflow_id = %workflow.id,
                    stage = %handler.stage(),
                    error = %e,
                    "First stage dispatch failed, aborting workflow"
                );
                self.ctx
                    .store
                    .finish_workflow(workflow.id, WorkflowStatus::Aborted)
                    .await?;
                return Err(e);
            }
        }

        self.get_workflow(workflow.id).await
    }

    pub async fn get_workflow(&self, id: Uuid) -> Result<Workflow, AppError> {
        self.ctx
            .store
            .get_workflow(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("workflow {}", id)))
    }

    pub async fn get_task(&self, id: Uuid) -> Result<Task, AppError> {
        self.ctx
            .store
            .get_task(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task {}", id)))
    }

    pub async fn list_sa_results(&self, task_id: Uuid) -> Result<Vec<SaResultWithFindings>, AppError> {
        let task = self.get_task(task_id).await?;
        Ok(self.ctx.store.list_sa_results(task.id).await?)
    }

    /// Replay the merge of a task from its stored SA and ML results.
    pub async fn remerge(&self, task_id: Uuid) -> Result<SummaryResult, AppError> {
        let task = self.get_task(task_id).await?;
        if !task.both_succeeded() {
            return Err(AppError::EngineNotReady(format!(
                "task {} cannot be merged until SA and ML both succeed",
                task.id
            )));
        }
        self.merge.merge_task(task.id).await
    }

    /// Record a reviewer verdict on a finding and refresh the task's audit count.
    pub async fn audit_finding(
        &self,
        task_id: Uuid,
        finding_id: Uuid,
        request: AuditRequest,
    ) -> Result<DetectedResult, AppError> {
        request.validate()?;
        let finding = self
            .ctx
            .store
            .get_detected_result(finding_id)
            .await?
            .filter(|f| f.task_id == task_id)
            .ok_or_else(|| AppError::NotFound(format!("detected result {}", finding_id)))?;

        let audit = Audit {
            handle_type: request.handle_type,
            audit_level: request.audit_level,
            memo: request.memo,
            audited_at: Utc::now(),
        };
        if !self.ctx.store.set_audit(finding.id, &audit).await? {
            return Err(AppError::NotFound(format!("detected result {}", finding_id)));
        }

        let audit_count = self.ctx.store.count_audited(task_id).await?;
        self.ctx.store.set_audit_count(task_id, audit_count).await?;

        tracing::info!(task_id = %task_id, finding_id = %finding.id, audit_count, "Finding audited");
        Ok(DetectedResult {
            audit: Some(audit),
            ..finding
        })
    }
}
