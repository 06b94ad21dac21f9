//! Configuration module
//!
//! This module provides configuration structures for the API process and the
//! orchestration services: database, blob storage, engine limits, merge
//! thresholds and completion consumer settings.

use std::env;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

// Common constants
const SERVER_PORT: u16 = 4000;
const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const BLOB_URL_EXPIRY_SECS: u64 = 3600;
const LOCAL_STORAGE_PATH: &str = "./data/blobs";
const LOCAL_STORAGE_BASE_URL: &str = "http://localhost:4000/blobs";

pub const ENGINE_TIMEOUT_MINUTES: u32 = 20;
pub const ENGINE_TIMEOUT_RANGE: (u32, u32) = (1, 30);
pub const ENGINE_MAX_MEMORY_GB: u32 = 6;
pub const ENGINE_MAX_MEMORY_RANGE: (u32, u32) = (1, 16);
pub const MERGE_THRESHOLD_LOW: f64 = 0.05;
pub const MERGE_THRESHOLD_HIGH: f64 = 0.95;

/// Blob storage backend types
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    S3,
    Local,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "s3" => Ok(StorageBackend::S3),
            "local" => Ok(StorageBackend::Local),
            _ => Err(anyhow::anyhow!("Invalid storage backend: {}", s)),
        }
    }
}

impl Display for StorageBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            StorageBackend::S3 => write!(f, "s3"),
            StorageBackend::Local => write!(f, "local"),
        }
    }
}

/// Process-level settings shared by every sacentral binary
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub environment: String,
}

/// Orchestration configuration
#[derive(Clone, Debug)]
pub struct AnalysisConfig {
    pub base: BaseConfig,
    /// When unset, the in-memory store and broker are used.
    pub database_url: Option<String>,
    // Blob storage configuration
    pub storage_backend: StorageBackend,
    pub local_storage_path: String,
    pub local_storage_base_url: String,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub blob_url_expiry_secs: u64,
    // Engine defaults forwarded in analysis payloads
    pub engine_timeout_minutes: u32,
    pub engine_max_memory_gb: u32,
    // Merge classification
    pub merge_threshold_low: f64,
    pub merge_threshold_high: f64,
    // Completion consumer
    pub consumer_max_workers: usize,
    pub consumer_poll_interval_ms: u64,
    pub queue_visibility_timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            base: BaseConfig {
                server_port: SERVER_PORT,
                db_max_connections: MAX_CONNECTIONS,
                db_timeout_seconds: CONNECTION_TIMEOUT_SECS,
                environment: "development".to_string(),
            },
            database_url: None,
            storage_backend: StorageBackend::Local,
            local_storage_path: LOCAL_STORAGE_PATH.to_string(),
            local_storage_base_url: LOCAL_STORAGE_BASE_URL.to_string(),
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
            blob_url_expiry_secs: BLOB_URL_EXPIRY_SECS,
            engine_timeout_minutes: ENGINE_TIMEOUT_MINUTES,
            engine_max_memory_gb: ENGINE_MAX_MEMORY_GB,
            merge_threshold_low: MERGE_THRESHOLD_LOW,
            merge_threshold_high: MERGE_THRESHOLD_HIGH,
            consumer_max_workers: 4,
            consumer_poll_interval_ms: 500,
            queue_visibility_timeout_secs: 300,
        }
    }
}

impl AnalysisConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        const CONSUMER_MAX_WORKERS: usize = 4;
        const CONSUMER_POLL_INTERVAL_MS: u64 = 500;
        const QUEUE_VISIBILITY_TIMEOUT_SECS: u64 = 300;

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let base = BaseConfig {
            server_port: env::var("PORT")
                .unwrap_or_else(|_| SERVER_PORT.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| MAX_CONNECTIONS.to_string())
                .parse()
                .unwrap_or(MAX_CONNECTIONS),
            db_timeout_seconds: env::var("DB_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| CONNECTION_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(CONNECTION_TIMEOUT_SECS),
            environment,
        };

        let storage_backend = match env::var("STORAGE_BACKEND") {
            Ok(value) if !value.trim().is_empty() => value.parse()?,
            _ => StorageBackend::Local,
        };

        let config = AnalysisConfig {
            base,
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            storage_backend,
            local_storage_path: env::var("LOCAL_STORAGE_PATH")
                .unwrap_or_else(|_| LOCAL_STORAGE_PATH.to_string()),
            local_storage_base_url: env::var("LOCAL_STORAGE_BASE_URL")
                .unwrap_or_else(|_| LOCAL_STORAGE_BASE_URL.to_string()),
            s3_bucket: env::var("S3_BUCKET").ok().filter(|s| !s.is_empty()),
            s3_region: env::var("S3_REGION").ok().filter(|s| !s.is_empty()),
            s3_endpoint: env::var("S3_ENDPOINT").ok().filter(|s| !s.is_empty()),
            blob_url_expiry_secs: env::var("BLOB_URL_EXPIRY_SECS")
                .unwrap_or_else(|_| BLOB_URL_EXPIRY_SECS.to_string())
                .parse()
                .unwrap_or(BLOB_URL_EXPIRY_SECS),
            engine_timeout_minutes: env::var("ENGINE_TIMEOUT_MINUTES")
                .unwrap_or_else(|_| ENGINE_TIMEOUT_MINUTES.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("ENGINE_TIMEOUT_MINUTES must be a valid number"))?,
            engine_max_memory_gb: env::var("ENGINE_MAX_MEMORY_GB")
                .unwrap_or_else(|_| ENGINE_MAX_MEMORY_GB.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("ENGINE_MAX_MEMORY_GB must be a valid number"))?,
            merge_threshold_low: env::var("MERGE_THRESHOLD_LOW")
                .unwrap_or_else(|_| MERGE_THRESHOLD_LOW.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("MERGE_THRESHOLD_LOW must be a number"))?,
            merge_threshold_high: env::var("MERGE_THRESHOLD_HIGH")
                .unwrap_or_else(|_| MERGE_THRESHOLD_HIGH.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("MERGE_THRESHOLD_HIGH must be a number"))?,
            consumer_max_workers: env::var("CONSUMER_MAX_WORKERS")
                .unwrap_or_else(|_| CONSUMER_MAX_WORKERS.to_string())
                .parse()
                .unwrap_or(CONSUMER_MAX_WORKERS),
            consumer_poll_interval_ms: env::var("CONSUMER_POLL_INTERVAL_MS")
                .unwrap_or_else(|_| CONSUMER_POLL_INTERVAL_MS.to_string())
                .parse()
                .unwrap_or(CONSUMER_POLL_INTERVAL_MS),
            queue_visibility_timeout_secs: env::var("QUEUE_VISIBILITY_TIMEOUT_SECS")
                .unwrap_or_else(|_| QUEUE_VISIBILITY_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(QUEUE_VISIBILITY_TIMEOUT_SECS),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if let Some(url) = &self.database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                return Err(anyhow::anyhow!(
                    "DATABASE_URL must be a valid PostgreSQL connection string"
                ));
            }
        }

        let (min_timeout, max_timeout) = ENGINE_TIMEOUT_RANGE;
        if !(min_timeout..=max_timeout).contains(&self.engine_timeout_minutes) {
            return Err(anyhow::anyhow!(
                "ENGINE_TIMEOUT_MINUTES must be between {} and {}",
                min_timeout,
                max_timeout
            ));
        }

        let (min_memory, max_memory) = ENGINE_MAX_MEMORY_RANGE;
        if !(min_memory..=max_memory).contains(&self.engine_max_memory_gb) {
            return Err(anyhow::anyhow!(
                "ENGINE_MAX_MEMORY_GB must be between {} and {}",
                min_memory,
                max_memory
            ));
        }

        let low = self.merge_threshold_low;
        let high = self.merge_threshold_high;
        if !low.is_finite() || !high.is_finite() || low < 0.0 || high > 1.0 || low > high {
            return Err(anyhow::anyhow!(
                "MERGE_THRESHOLD_LOW and MERGE_THRESHOLD_HIGH must satisfy 0 <= low <= high <= 1"
            ));
        }

        if self.consumer_max_workers == 0 {
            return Err(anyhow::anyhow!("CONSUMER_MAX_WORKERS must be at least 1"));
        }

        match self.storage_backend {
            StorageBackend::S3 => {
                if self.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_BUCKET must be set when using S3 storage backend"
                    ));
                }
                if self.s3_region.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION must be set when using S3 storage backend"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.local_storage_path.trim().is_empty() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when using local storage backend"
                    ));
                }
                if self.local_storage_base_url.trim().is_empty() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_BASE_URL must be set when using local storage backend"
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Application configuration.
#[derive(Clone, Debug, Default)]
pub struct Config(pub Box<AnalysisConfig>);

impl Config {
    fn as_analysis(&self) -> &AnalysisConfig {
        &self.0
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.as_analysis().base.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = AnalysisConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.as_analysis().validate()
    }

    pub fn server_port(&self) -> u16 {
        self.as_analysis().base.server_port
    }

    pub fn environment(&self) -> &str {
        &self.as_analysis().base.environment
    }

    pub fn db_max_connections(&self) -> u32 {
        self.as_analysis().base.db_max_connections
    }

    pub fn db_timeout_seconds(&self) -> u64 {
        self.as_analysis().base.db_timeout_seconds
    }

    pub fn database_url(&self) -> Option<&str> {
        self.as_analysis().database_url.as_deref()
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.as_analysis().storage_backend
    }

    pub fn local_storage_path(&self) -> &str {
        &self.as_analysis().local_storage_path
    }

    pub fn local_storage_base_url(&self) -> &str {
        &self.as_analysis().local_storage_base_url
    }

    pub fn s3_bucket(&self) -> Option<&str> {
        self.as_analysis().s3_bucket.as_deref()
    }

    pub fn s3_region(&self) -> Option<&str> {
        self.as_analysis().s3_region.as_deref()
    }

    pub fn s3_endpoint(&self) -> Option<&str> {
        self.as_analysis().s3_endpoint.as_deref()
    }

    pub fn blob_url_expiry_secs(&self) -> u64 {
        self.as_analysis().blob_url_expiry_secs
    }

    pub fn engine_timeout_minutes(&self) -> u32 {
        self.as_analysis().engine_timeout_minutes
    }

    pub fn engine_max_memory_gb(&self) -> u32 {
        self.as_analysis().engine_max_memory_gb
    }

    pub fn merge_threshold_low(&self) -> f64 {
        self.as_analysis().merge_threshold_low
    }

    pub fn merge_threshold_high(&self) -> f64 {
        self.as_analysis().merge_threshold_high
    }

    pub fn consumer_max_workers(&self) -> usize {
        self.as_analysis().consumer_max_workers
    }

    pub fn consumer_poll_interval_ms(&self) -> u64 {
        self.as_analysis().consumer_poll_interval_ms
    }

    pub fn queue_visibility_timeout_secs(&self) -> u64 {
        self.as_analysis().queue_visibility_timeout_secs
    }
}
