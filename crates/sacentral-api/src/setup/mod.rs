//! Application setup and initialization

pub mod database;
pub mod routes;
pub mod server;
pub mod services;

use crate::state::AppState;
use anyhow::{Context, Result};
use sacentral_core::Config;
use sacentral_worker::CompletionConsumer;
use std::sync::Arc;

/// Initialize the entire application: backends, services, consumer and routes.
pub async fn initialize_app(
    config: Config,
) -> Result<(Arc<AppState>, axum::Router, CompletionConsumer)> {
    config
        .validate()
        .context("Configuration validation failed")?;

    crate::telemetry::init_telemetry(config.environment())
        .context("Failed to initialize telemetry")?;
    tracing::info!("Configuration loaded and validated successfully");

    let (store, broker) = services::setup_backends(&config).await?;

    let blobs = sacentral_storage::create_blob_store(&config)
        .await
        .context("Failed to initialize blob store")?;

    let state = services::initialize_services(&config, store, blobs, broker.clone())?;
    let consumer = services::start_consumer(&config, broker, &state);

    let router = routes::setup_routes(state.clone());

    Ok((state, router, consumer))
}
