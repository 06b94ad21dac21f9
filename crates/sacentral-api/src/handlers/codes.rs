use crate::constants::DEFAULT_TRIGGER;
use crate::error::{HttpAppError, ValidatedJson};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use sacentral_core::models::{CodeData, EngineLimits, Workflow, WorkflowType};
use sacentral_services::{RegisterCode, StartWorkflow};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Body of a workflow submission. Every field is optional.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StartWorkflowRequest {
    /// Omitted: compile+SA+ML for uncompiled code, SA+ML otherwise.
    #[serde(default)]
    pub workflow_type: Option<WorkflowType>,
    #[serde(default)]
    #[validate(length(min = 1, max = 64))]
    pub trigger: Option<String>,
    #[serde(default)]
    pub rule_template_id: Option<Uuid>,
    /// Engine timeout in minutes
    #[serde(default)]
    pub timeout: Option<u32>,
    /// Engine memory in gigabytes
    #[serde(default)]
    pub max_memory: Option<u32>,
}

impl StartWorkflowRequest {
    fn into_command(self, code_id: Uuid, defaults: EngineLimits) -> StartWorkflow {
        let limits = if self.timeout.is_some() || self.max_memory.is_some() {
            Some(EngineLimits {
                timeout_minutes: self.timeout.unwrap_or(defaults.timeout_minutes),
                max_memory_gb: self.max_memory.unwrap_or(defaults.max_memory_gb),
            })
        } else {
            None
        };

        StartWorkflow {
            code_id,
            workflow_type: self.workflow_type,
            trigger: self.trigger.unwrap_or_else(|| DEFAULT_TRIGGER.to_string()),
            rule_template_id: self.rule_template_id,
            limits,
        }
    }
}

/// Register a source archive already uploaded to the blob store
#[tracing::instrument(skip(state, request))]
pub async fn register_code(
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<RegisterCode>,
) -> Result<(StatusCode, Json<CodeData>), HttpAppError> {
    let code = state.workflows.register_code(request).await?;
    Ok((StatusCode::CREATED, Json(code)))
}

/// Start a workflow for a code artifact and dispatch its first stage
#[tracing::instrument(skip(state, request))]
pub async fn start_workflow(
    State(state): State<Arc<AppState>>,
    Path(code_id): Path<Uuid>,
    ValidatedJson(request): ValidatedJson<StartWorkflowRequest>,
) -> Result<(StatusCode, Json<Workflow>), HttpAppError> {
    let command = request.into_command(code_id, state.default_limits);
    let workflow = state.workflows.start_workflow(command).await?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_untouched_when_not_requested() {
        let command = StartWorkflowRequest::default().into_command(Uuid::nil(), EngineLimits::default());
        assert!(command.limits.is_none());
        assert!(command.workflow_type.is_none());
        assert_eq!(command.trigger, DEFAULT_TRIGGER);
    }

    #[test]
    fn test_partial_limits_fill_from_defaults() {
        let request: StartWorkflowRequest =
            serde_json::from_value(serde_json::json!({"timeout": 10, "workflowType": "sa_ml"}))
                .unwrap();
        let command = request.into_command(Uuid::nil(), EngineLimits::default());
        assert_eq!(
            command.limits,
            Some(EngineLimits {
                timeout_minutes: 10,
                max_memory_gb: EngineLimits::default().max_memory_gb,
            })
        );
        assert_eq!(command.workflow_type, Some(WorkflowType::SaMl));
    }

    #[test]
    fn test_trigger_length_is_validated() {
        assert!(StartWorkflowRequest::default().validate().is_ok());
        let blank = StartWorkflowRequest {
            trigger: Some(String::new()),
            ..Default::default()
        };
        assert!(blank.validate().is_err());
    }
}
