//! Persistence seams used by the orchestration services

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use sacentral_core::models::{
    Audit, CodeData, DetectedResult, MlPipeline, Rule, RuleTemplate, RuleTemplateSnapshot,
    SaPipeline, SaResultWithFindings, StoredFile, SubPipelineStatus, SummaryResult, Task,
    TaskKind, Workflow, WorkflowStatus,
};

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Persist a workflow and its task together, or neither.
    async fn create_workflow(&self, workflow: &Workflow, task: &Task) -> Result<()>;

    async fn get_workflow(&self, id: Uuid) -> Result<Option<Workflow>>;

    /// Increment progress by one and append `at` to the timeline.
    ///
    /// Only applies while the workflow is running and `progress < steps`;
    /// returns the updated workflow, or `None` when the guard rejected it.
    async fn advance_workflow(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<Workflow>>;

    /// Move a running workflow to a terminal status. Returns false if it was not running.
    async fn finish_workflow(&self, id: Uuid, status: WorkflowStatus) -> Result<bool>;
}

/// Everything the analysis stage binds to a task before contacting the engines.
#[derive(Debug, Clone)]
pub struct AnalysisBinding {
    pub kind: TaskKind,
    pub snapshot: RuleTemplateSnapshot,
    pub sa: SaPipeline,
    pub ml: MlPipeline,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>>;

    /// Point the task at its compiled artifact, optionally recording SA progress.
    ///
    /// Only applies while the task has no compiled target or already points at
    /// `object_key`; returns false when another artifact is bound.
    async fn set_compiled_target(
        &self,
        id: Uuid,
        object_name: &str,
        object_key: &str,
        sa_progress: Option<u8>,
    ) -> Result<bool>;

    /// Bind the rule snapshot and starting sub-pipeline state.
    ///
    /// The snapshot is captured once per task: returns false if one is already bound.
    async fn bind_analysis(&self, id: Uuid, binding: &AnalysisBinding) -> Result<bool>;

    /// Compare-and-set of the SA sub-pipeline: applies `next` only if the stored status is `from`.
    ///
    /// Also copies `next.weakness_count` to the task-level weakness count.
    async fn transition_sa(&self, id: Uuid, from: SubPipelineStatus, next: &SaPipeline)
        -> Result<bool>;

    /// Compare-and-set of the ML sub-pipeline.
    async fn transition_ml(&self, id: Uuid, from: SubPipelineStatus, next: &MlPipeline)
        -> Result<bool>;

    /// Record the automatic merge of a task: claim and summary in one conditional write.
    ///
    /// Succeeds at most once per task, and only when both sub-pipelines succeeded.
    /// A losing caller leaves the stored summary untouched.
    async fn claim_merge(
        &self,
        id: Uuid,
        summary: &SummaryResult,
        weakness_count: u32,
    ) -> Result<bool>;

    /// Unconditional write of the merge output, used by manual re-merges.
    async fn store_summary(
        &self,
        id: Uuid,
        summary: &SummaryResult,
        weakness_count: u32,
    ) -> Result<()>;

    async fn set_audit_count(&self, id: Uuid, audit_count: u32) -> Result<()>;
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Persist grouping records and their findings, or nothing.
    async fn insert_sa_results(&self, task_id: Uuid, results: &[SaResultWithFindings])
        -> Result<()>;

    /// Remove grouping records (and their findings) by id.
    async fn delete_sa_results(&self, task_id: Uuid, result_ids: &[Uuid]) -> Result<()>;

    /// Grouping records of a task in insertion order, findings in reported order.
    async fn list_sa_results(&self, task_id: Uuid) -> Result<Vec<SaResultWithFindings>>;

    async fn get_detected_result(&self, id: Uuid) -> Result<Option<DetectedResult>>;

    /// Set the audit sub-record of a finding. Returns false if the finding does not exist.
    async fn set_audit(&self, id: Uuid, audit: &Audit) -> Result<bool>;

    /// Number of distinct audited findings of a task.
    async fn count_audited(&self, task_id: Uuid) -> Result<u32>;
}

#[async_trait]
pub trait RuleCatalog: Send + Sync {
    async fn get_template(&self, id: Uuid) -> Result<Option<RuleTemplate>>;

    /// The enabled template flagged as default, if any.
    async fn default_template(&self) -> Result<Option<RuleTemplate>>;

    /// Currently active rules of a template, in template order.
    async fn active_rules(&self, template_id: Uuid) -> Result<Vec<Rule>>;
}

#[async_trait]
pub trait FileRepository: Send + Sync {
    async fn get_code(&self, id: Uuid) -> Result<Option<CodeData>>;

    async fn get_file(&self, id: Uuid) -> Result<Option<StoredFile>>;

    async fn create_code(&self, code: &CodeData, source: &StoredFile) -> Result<()>;

    /// Register a compiled artifact as a stored file and attach it to the code record.
    ///
    /// Returns false without writing when the code's compiled file already has
    /// the same object key.
    async fn register_compiled(&self, code_id: Uuid, file: &StoredFile) -> Result<bool>;
}

/// The full store the orchestration services run against.
pub trait AnalysisStore:
    WorkflowStore + TaskStore + ResultStore + RuleCatalog + FileRepository
{
}

impl<T> AnalysisStore for T where
    T: WorkflowStore + TaskStore + ResultStore + RuleCatalog + FileRepository
{
}
