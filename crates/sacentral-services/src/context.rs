use std::sync::Arc;
use std::time::Duration;

use sacentral_core::models::EngineLimits;
use sacentral_core::{AppError, Config, Thresholds};
use sacentral_db::AnalysisStore;
use sacentral_storage::BlobStore;
use sacentral_worker::Broker;

const DEFAULT_URL_EXPIRY: Duration = Duration::from_secs(3600);

/// Collaborators shared by dispatch handlers, completion processors and services.
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<dyn AnalysisStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub broker: Arc<dyn Broker>,
    /// Lifetime of the access URLs handed to engines.
    pub url_expiry: Duration,
    pub thresholds: Thresholds,
    /// Limits used when a submission does not choose its own.
    pub default_limits: EngineLimits,
}

impl PipelineContext {
    pub fn new(
        store: Arc<dyn AnalysisStore>,
        blobs: Arc<dyn BlobStore>,
        broker: Arc<dyn Broker>,
    ) -> Self {
        Self {
            store,
            blobs,
            broker,
            url_expiry: DEFAULT_URL_EXPIRY,
            thresholds: Thresholds::default(),
            default_limits: EngineLimits::default(),
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn AnalysisStore>,
        blobs: Arc<dyn BlobStore>,
        broker: Arc<dyn Broker>,
    ) -> Result<Self, AppError> {
        let thresholds = Thresholds::new(
            config.merge_threshold_low(),
            config.merge_threshold_high(),
        )
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;

        Ok(Self {
            url_expiry: Duration::from_secs(config.blob_url_expiry_secs()),
            thresholds,
            default_limits: EngineLimits {
                timeout_minutes: config.engine_timeout_minutes(),
                max_memory_gb: config.engine_max_memory_gb(),
            },
            ..Self::new(store, blobs, broker)
        })
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }
}
