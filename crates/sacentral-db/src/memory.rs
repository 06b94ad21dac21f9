//! In-memory store
//!
//! All state lives behind one lock, so every trait operation is atomic with
//! respect to every other.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use sacentral_core::models::{
    Audit, CodeData, DetectedResult, MlPipeline, Rule, RuleTemplate, SaPipeline, SaResult,
    SaResultWithFindings, StoredFile, SubPipelineStatus, SummaryResult, Task, Workflow,
    WorkflowStatus,
};

use crate::store::{
    AnalysisBinding, FileRepository, ResultStore, RuleCatalog, TaskStore, WorkflowStore,
};

#[derive(Default)]
struct State {
    workflows: HashMap<Uuid, Workflow>,
    tasks: HashMap<Uuid, Task>,
    sa_results: Vec<SaResult>,
    detected_results: HashMap<Uuid, DetectedResult>,
    rules: HashMap<Uuid, Rule>,
    templates: Vec<RuleTemplate>,
    codes: HashMap<Uuid, CodeData>,
    files: HashMap<Uuid, StoredFile>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_rule(&self, rule: Rule) {
        self.state.write().await.rules.insert(rule.id, rule);
    }

    pub async fn seed_template(&self, template: RuleTemplate) {
        let mut state = self.state.write().await;
        state.templates.retain(|t| t.id != template.id);
        state.templates.push(template);
    }

    pub async fn seed_file(&self, file: StoredFile) {
        self.state.write().await.files.insert(file.id, file);
    }

    pub async fn seed_code(&self, code: CodeData) {
        self.state.write().await.codes.insert(code.id, code);
    }

    pub async fn workflow_count(&self) -> usize {
        self.state.read().await.workflows.len()
    }

    /// Number of stored files in `folder`.
    pub async fn file_count(&self, folder: &str) -> usize {
        self.state
            .read()
            .await
            .files
            .values()
            .filter(|f| f.folder == folder)
            .count()
    }

    pub async fn sa_result_count(&self, task_id: Uuid) -> usize {
        self.state
            .read()
            .await
            .sa_results
            .iter()
            .filter(|r| r.task_id == task_id)
            .count()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn create_workflow(&self, workflow: &Workflow, task: &Task) -> Result<()> {
        let mut state = self.state.write().await;
        if state.workflows.contains_key(&workflow.id) || state.tasks.contains_key(&task.id) {
            anyhow::bail!("Workflow {} or task {} already exists", workflow.id, task.id);
        }
        state.tasks.insert(task.id, task.clone());
        state.workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn get_workflow(&self, id: Uuid) -> Result<Option<Workflow>> {
        Ok(self.state.read().await.workflows.get(&id).cloned())
    }

    async fn advance_workflow(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<Workflow>> {
        let mut state = self.state.write().await;
        let Some(workflow) = state.workflows.get_mut(&id) else {
            return Ok(None);
        };
        if !workflow.is_running() || workflow.is_fully_progressed() {
            return Ok(None);
        }
        workflow.progress += 1;
        workflow.timeline.push(at);
        workflow.updated_at = at;
        Ok(Some(workflow.clone()))
    }

    async fn finish_workflow(&self, id: Uuid, status: WorkflowStatus) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(workflow) = state.workflows.get_mut(&id) else {
            return Ok(false);
        };
        if !workflow.status.can_transition_to(status) {
            return Ok(false);
        }
        workflow.status = status;
        workflow.updated_at = Utc::now();
        Ok(true)
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        Ok(self.state.read().await.tasks.get(&id).cloned())
    }

    async fn set_compiled_target(
        &self,
        id: Uuid,
        object_name: &str,
        object_key: &str,
        sa_progress: Option<u8>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let task = state
            .tasks
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("Task {} not found", id))?;
        if task
            .target_object_key
            .as_deref()
            .is_some_and(|bound| bound != object_key)
        {
            return Ok(false);
        }
        task.target_object_name = object_name.to_string();
        task.target_object_key = Some(object_key.to_string());
        if let Some(progress) = sa_progress {
            task.sa.progress = progress;
        }
        task.updated_at = Utc::now();
        Ok(true)
    }

    async fn bind_analysis(&self, id: Uuid, binding: &AnalysisBinding) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(task) = state.tasks.get_mut(&id) else {
            return Ok(false);
        };
        if task.rule_snapshot.is_some() {
            return Ok(false);
        }
        task.kind = Some(binding.kind);
        task.rule_snapshot = Some(binding.snapshot.clone());
        task.sa = binding.sa.clone();
        task.ml = binding.ml.clone();
        task.updated_at = Utc::now();
        Ok(true)
    }

    async fn transition_sa(
        &self,
        id: Uuid,
        from: SubPipelineStatus,
        next: &SaPipeline,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(task) = state.tasks.get_mut(&id) else {
            return Ok(false);
        };
        if task.sa.status != from {
            return Ok(false);
        }
        task.sa = next.clone();
        task.weakness_count = next.weakness_count;
        task.updated_at = Utc::now();
        Ok(true)
    }

    async fn transition_ml(
        &self,
        id: Uuid,
        from: SubPipelineStatus,
        next: &MlPipeline,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(task) = state.tasks.get_mut(&id) else {
            return Ok(false);
        };
        if task.ml.status != from {
            return Ok(false);
        }
        task.ml = next.clone();
        task.updated_at = Utc::now();
        Ok(true)
    }

    async fn claim_merge(
        &self,
        id: Uuid,
        summary: &SummaryResult,
        weakness_count: u32,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(task) = state.tasks.get_mut(&id) else {
            return Ok(false);
        };
        if task.merge_claimed || !task.both_succeeded() {
            return Ok(false);
        }
        task.merge_claimed = true;
        task.summary = summary.clone();
        task.weakness_count = weakness_count;
        task.updated_at = Utc::now();
        Ok(true)
    }

    async fn store_summary(
        &self,
        id: Uuid,
        summary: &SummaryResult,
        weakness_count: u32,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let task = state
            .tasks
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("Task {} not found", id))?;
        task.summary = summary.clone();
        task.weakness_count = weakness_count;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn set_audit_count(&self, id: Uuid, audit_count: u32) -> Result<()> {
        let mut state = self.state.write().await;
        let task = state
            .tasks
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("Task {} not found", id))?;
        task.audit_count = audit_count;
        Ok(())
    }
}

#[async_trait]
impl ResultStore for InMemoryStore {
    async fn insert_sa_results(
        &self,
        task_id: Uuid,
        results: &[SaResultWithFindings],
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(bad) = results.iter().find(|r| r.result.task_id != task_id) {
            anyhow::bail!("SA result {} does not belong to task {}", bad.result.id, task_id);
        }
        for group in results {
            for finding in &group.detected_results {
                state.detected_results.insert(finding.id, finding.clone());
            }
            state.sa_results.push(group.result.clone());
        }
        Ok(())
    }

    async fn delete_sa_results(&self, task_id: Uuid, result_ids: &[Uuid]) -> Result<()> {
        let mut state = self.state.write().await;
        let finding_ids: Vec<Uuid> = state
            .sa_results
            .iter()
            .filter(|r| r.task_id == task_id && result_ids.contains(&r.id))
            .flat_map(|r| r.detected_result_ids.iter().copied())
            .collect();
        for id in finding_ids {
            state.detected_results.remove(&id);
        }
        state
            .sa_results
            .retain(|r| !(r.task_id == task_id && result_ids.contains(&r.id)));
        Ok(())
    }

    async fn list_sa_results(&self, task_id: Uuid) -> Result<Vec<SaResultWithFindings>> {
        let state = self.state.read().await;
        let groups = state
            .sa_results
            .iter()
            .filter(|r| r.task_id == task_id)
            .map(|r| SaResultWithFindings {
                result: r.clone(),
                detected_results: r
                    .detected_result_ids
                    .iter()
                    .filter_map(|id| state.detected_results.get(id).cloned())
                    .collect(),
            })
            .collect();
        Ok(groups)
    }

    async fn get_detected_result(&self, id: Uuid) -> Result<Option<DetectedResult>> {
        Ok(self.state.read().await.detected_results.get(&id).cloned())
    }

    async fn set_audit(&self, id: Uuid, audit: &Audit) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.detected_results.get_mut(&id) {
            Some(finding) => {
                finding.audit = Some(audit.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count_audited(&self, task_id: Uuid) -> Result<u32> {
        let state = self.state.read().await;
        let count = state
            .detected_results
            .values()
            .filter(|d| d.task_id == task_id && d.audit.is_some())
            .count();
        Ok(count as u32)
    }
}

#[async_trait]
impl RuleCatalog for InMemoryStore {
    async fn get_template(&self, id: Uuid) -> Result<Option<RuleTemplate>> {
        let state = self.state.read().await;
        Ok(state.templates.iter().find(|t| t.id == id).cloned())
    }

    async fn default_template(&self) -> Result<Option<RuleTemplate>> {
        let state = self.state.read().await;
        Ok(state
            .templates
            .iter()
            .find(|t| t.is_default && t.enabled)
            .cloned())
    }

    async fn active_rules(&self, template_id: Uuid) -> Result<Vec<Rule>> {
        let state = self.state.read().await;
        let Some(template) = state.templates.iter().find(|t| t.id == template_id) else {
            return Ok(Vec::new());
        };
        Ok(template
            .rule_ids
            .iter()
            .filter_map(|id| state.rules.get(id))
            .filter(|r| r.is_active())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl FileRepository for InMemoryStore {
    async fn get_code(&self, id: Uuid) -> Result<Option<CodeData>> {
        Ok(self.state.read().await.codes.get(&id).cloned())
    }

    async fn get_file(&self, id: Uuid) -> Result<Option<StoredFile>> {
        Ok(self.state.read().await.files.get(&id).cloned())
    }

    async fn create_code(&self, code: &CodeData, source: &StoredFile) -> Result<()> {
        let mut state = self.state.write().await;
        state.files.insert(source.id, source.clone());
        state.codes.insert(code.id, code.clone());
        Ok(())
    }

    async fn register_compiled(&self, code_id: Uuid, file: &StoredFile) -> Result<bool> {
        let mut state = self.state.write().await;
        let current = state
            .codes
            .get(&code_id)
            .ok_or_else(|| anyhow::anyhow!("Code {} not found", code_id))?
            .compiled_file_id;
        if current
            .and_then(|id| state.files.get(&id))
            .is_some_and(|existing| existing.object_key == file.object_key)
        {
            return Ok(false);
        }
        state.files.insert(file.id, file.clone());
        if let Some(code) = state.codes.get_mut(&code_id) {
            code.compiled_file_id = Some(file.id);
        }
        Ok(true)
    }
}
