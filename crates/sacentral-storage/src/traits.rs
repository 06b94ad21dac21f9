//! Blob store abstraction trait

use crate::StorageBackend;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<StorageError> for sacentral_core::AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => {
                sacentral_core::AppError::NotFound(format!("object {}", key))
            }
            other => sacentral_core::AppError::Storage(other.to_string()),
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Read-only view of the blob store as the orchestrator needs it.
///
/// Uploads and downloads happen elsewhere; dispatch handlers only need a
/// URL the engine can fetch the artifact from.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Generate a temporary URL granting GET access to `object_key`
    async fn presigned_url(&self, object_key: &str, expires_in: Duration)
        -> StorageResult<String>;

    /// Check if an object exists
    async fn exists(&self, object_key: &str) -> StorageResult<bool>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}
