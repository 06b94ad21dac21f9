//! Store, broker, orchestration services and completion consumer wiring

use super::database;
use crate::state::AppState;
use anyhow::{Context, Result};
use sacentral_core::Config;
use sacentral_db::{AnalysisStore, InMemoryStore, PgStore};
use sacentral_services::PipelineContext;
use sacentral_storage::BlobStore;
use sacentral_worker::{Broker, CompletionConsumer, ConsumerConfig, InMemoryBroker, PgBroker};
use std::sync::Arc;

/// PostgreSQL store and broker when `DATABASE_URL` is set, in-memory otherwise.
pub async fn setup_backends(config: &Config) -> Result<(Arc<dyn AnalysisStore>, Arc<dyn Broker>)> {
    match config.database_url() {
        Some(url) => {
            let pool = database::setup_database(config, url).await?;
            tracing::info!("Using PostgreSQL store and broker");
            Ok((
                Arc::new(PgStore::new(pool.clone())),
                Arc::new(PgBroker::new(pool)),
            ))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store and broker");
            Ok((Arc::new(InMemoryStore::new()), Arc::new(InMemoryBroker::new())))
        }
    }
}

pub fn initialize_services(
    config: &Config,
    store: Arc<dyn AnalysisStore>,
    blobs: Arc<dyn BlobStore>,
    broker: Arc<dyn Broker>,
) -> Result<Arc<AppState>> {
    let ctx = PipelineContext::from_config(config, store, blobs, broker)
        .context("Invalid orchestration settings")?;

    tracing::info!(
        threshold_low = ctx.thresholds.low,
        threshold_high = ctx.thresholds.high,
        timeout_minutes = ctx.default_limits.timeout_minutes,
        max_memory_gb = ctx.default_limits.max_memory_gb,
        "Orchestration services initialized"
    );

    Ok(Arc::new(AppState::new(ctx)))
}

/// Start draining the completion queues into the state's processor.
pub fn start_consumer(
    config: &Config,
    broker: Arc<dyn Broker>,
    state: &AppState,
) -> CompletionConsumer {
    CompletionConsumer::start(
        broker,
        Arc::new(state.processor.clone()),
        ConsumerConfig::from(config),
    )
}
