use crate::error::{HttpAppError, ValidatedJson};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use sacentral_core::models::{DetectedResult, SaResultWithFindings, SummaryResult, Task};
use sacentral_services::AuditRequest;
use std::sync::Arc;
use uuid::Uuid;

/// Task with both sub-pipelines and the merged summary
#[tracing::instrument(skip(state))]
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<Task>, HttpAppError> {
    Ok(Json(state.workflows.get_task(task_id).await?))
}

/// SA findings grouped per rule
#[tracing::instrument(skip(state))]
pub async fn list_sa_results(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<Vec<SaResultWithFindings>>, HttpAppError> {
    Ok(Json(state.workflows.list_sa_results(task_id).await?))
}

/// Replay the merge. Answers 409 until SA and ML both succeeded.
#[tracing::instrument(skip(state))]
pub async fn remerge(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<SummaryResult>, HttpAppError> {
    tracing::info!(task_id = %task_id, "Manual merge requested");
    Ok(Json(state.workflows.remerge(task_id).await?))
}

#[tracing::instrument(skip(state, request))]
pub async fn audit_detected_result(
    State(state): State<Arc<AppState>>,
    Path((task_id, result_id)): Path<(Uuid, Uuid)>,
    ValidatedJson(request): ValidatedJson<AuditRequest>,
) -> Result<Json<DetectedResult>, HttpAppError> {
    let finding = state
        .workflows
        .audit_finding(task_id, result_id, request)
        .await?;
    Ok(Json(finding))
}
