//! Route configuration and setup

use crate::constants::{API_PREFIX, MAX_REQUEST_BODY_BYTES};
use crate::handlers;
use crate::state::AppState;
use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Build the application router over `state`.
pub fn setup_routes(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/codes", post(handlers::codes::register_code))
        .route(
            "/codes/{code_id}/workflows",
            post(handlers::codes::start_workflow),
        )
        .route("/workflows/{workflow_id}", get(handlers::workflows::get_workflow))
        .route("/tasks/{task_id}", get(handlers::tasks::get_task))
        .route(
            "/tasks/{task_id}/sa-results",
            get(handlers::tasks::list_sa_results),
        )
        .route("/tasks/{task_id}/merge", post(handlers::tasks::remerge))
        .route(
            "/tasks/{task_id}/detected-results/{result_id}/audit",
            put(handlers::tasks::audit_detected_result),
        );

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest(API_PREFIX, api)
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
