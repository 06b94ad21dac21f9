//! Completion processors
//!
//! One processor per completion queue. All three tolerate duplicate delivery
//! and run in any order: every decision that two processors could race on is
//! a conditional write in the store (`advance_workflow`, `transition_sa`,
//! `transition_ml`, `claim_merge`, `finish_workflow`).
//!
//! Settling a workflow after an analysis finished is safe to repeat, so a
//! duplicate SA or ML completion for a still running workflow settles it
//! again instead of being dropped. That recovers a delivery that was
//! interrupted between its sub-pipeline write and the merge.

mod compile;
mod ml;
mod sa;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use sacentral_core::models::{SubPipelineStatus, Task, TaskKind, Workflow, WorkflowStatus};
use sacentral_core::{AppError, CompletionMessage};
use sacentral_worker::CompletionHandler;

use crate::context::PipelineContext;
use crate::dispatch::{next_handler, DispatchOutcome};
use crate::merge::MergeService;

#[derive(Clone)]
pub struct CompletionProcessor {
    ctx: PipelineContext,
    merge: MergeService,
}

impl CompletionProcessor {
    pub fn new(ctx: PipelineContext) -> Self {
        let merge = MergeService::new(ctx.clone());
        Self { ctx, merge }
    }

    pub async fn process(&self, message: CompletionMessage) -> Result<(), AppError> {
        match message {
            CompletionMessage::CompileFinished(m) => self.on_compile_finished(m).await,
            CompletionMessage::SaFinished(m) => self.on_sa_finished(m).await,
            CompletionMessage::MlFinished(m) => self.on_ml_finished(m).await,
        }
    }

    /// Workflow and task of an analysis completion, or `None` when the message must be dropped.
    async fn resolve_analysis(
        &self,
        workflow_id: Uuid,
        task_id: Uuid,
    ) -> Result<Option<(Workflow, Task)>, AppError> {
        let Some(workflow) = self.ctx.store.get_workflow(workflow_id).await? else {
            tracing::info!(workflow_id = %workflow_id, "Workflow not found, dropping completion");
            return Ok(None);
        };
        let Some(task) = self.ctx.store.get_task(task_id).await? else {
            tracing::info!(task_id = %task_id, "Task not found, dropping completion");
            return Ok(None);
        };
        if workflow.task_id != task.id {
            tracing::warn!(
                workflow_id = %workflow.id,
                task_id = %task.id,
                "Task does not belong to workflow, dropping completion"
            );
            return Ok(None);
        }
        Ok(Some((workflow, task)))
    }

    /// Settle again after a duplicate completion for a sub-pipeline that is already terminal.
    async fn resettle(&self, workflow: Workflow, task: &Task) -> Result<(), AppError> {
        if !workflow.is_running() {
            tracing::info!(status = %workflow.status, "Workflow already settled, dropping duplicate");
            return Ok(());
        }
        tracing::info!(task_id = %task.id, "Duplicate completion for a running workflow, settling again");
        self.settle_analysis(workflow, task.id).await
    }

    /// Advance a running workflow that still has stages left. Returns the latest known state.
    async fn advance(&self, workflow: Workflow) -> Result<Workflow, AppError> {
        if !workflow.is_running() || workflow.is_fully_progressed() {
            return Ok(workflow);
        }
        match self.ctx.store.advance_workflow(workflow.id, Utc::now()).await? {
            Some(advanced) => Ok(advanced),
            None => Ok(self
                .ctx
                .store
                .get_workflow(workflow.id)
                .await?
                .unwrap_or(workflow)),
        }
    }

    async fn finish(&self, workflow_id: Uuid, status: WorkflowStatus) -> Result<(), AppError> {
        if self.ctx.store.finish_workflow(workflow_id, status).await? {
            tracing::info!(workflow_id = %workflow_id, status = %status, "Workflow finished");
        }
        Ok(())
    }

    /// Dispatch the next stage of `workflow`, if any. A failed dispatch aborts the workflow.
    async fn chain(&self, workflow: &Workflow) -> Result<(), AppError> {
        if !workflow.is_running() {
            return Ok(());
        }
        let Some(handler) = next_handler(workflow) else {
            return Ok(());
        };
        match handler.dispatch(&self.ctx, workflow).await {
            Ok(DispatchOutcome::Dispatched(queues)) => {
                tracing::debug!(workflow_id = %workflow.id, stage = %handler.stage(), ?queues, "Next stage dispatched");
                Ok(())
            }
            Ok(outcome) => {
                tracing::debug!(workflow_id = %workflow.id, ?outcome, "Next stage not dispatched");
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    workflow_id = %workflow.id,
                    stage = %handler.stage(),
                    error = %e,
                    "Stage dispatch failed, aborting workflow"
                );
                self.finish(workflow.id, WorkflowStatus::Aborted).await
            }
        }
    }

    /// After one analysis sub-pipeline reached a terminal state: merge if both
    /// succeeded, finalise the workflow once the task's analyses are settled,
    /// then chain any remaining stage.
    async fn settle_analysis(&self, workflow: Workflow, task_id: Uuid) -> Result<(), AppError> {
        let workflow = self.advance(workflow).await?;
        let Some(task) = self.ctx.store.get_task(task_id).await? else {
            return Ok(());
        };

        match task.kind {
            Some(TaskKind::Sa) => {
                self.finish(workflow.id, terminal_status(task.sa.status))
                    .await?;
            }
            Some(TaskKind::Ml) => {
                self.finish(workflow.id, terminal_status(task.ml.status))
                    .await?;
            }
            Some(TaskKind::SaMl) => {
                if task.both_succeeded() {
                    self.merge.merge_once(&task).await?;
                    self.finish(workflow.id, WorkflowStatus::Complete).await?;
                } else if task.both_terminal() {
                    self.finish(workflow.id, WorkflowStatus::Aborted).await?;
                }
            }
            None => {}
        }

        if workflow.is_fully_progressed() {
            return Ok(());
        }
        self.chain(&workflow).await
    }
}

fn terminal_status(status: SubPipelineStatus) -> WorkflowStatus {
    if status == SubPipelineStatus::Success {
        WorkflowStatus::Complete
    } else {
        WorkflowStatus::Aborted
    }
}

#[async_trait]
impl CompletionHandler for CompletionProcessor {
    async fn handle_completion(&self, message: CompletionMessage) -> Result<(), AppError> {
        self.process(message).await
    }
}
