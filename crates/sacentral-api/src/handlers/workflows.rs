use crate::error::HttpAppError;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use sacentral_core::models::Workflow;
use std::sync::Arc;
use uuid::Uuid;

#[tracing::instrument(skip(state))]
pub async fn get_workflow(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<Uuid>,
) -> Result<Json<Workflow>, HttpAppError> {
    let workflow = state.workflows.get_workflow(workflow_id).await?;
    Ok(Json(workflow))
}
