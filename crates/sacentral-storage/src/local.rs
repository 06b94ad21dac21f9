use crate::traits::{BlobStore, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

/// Local filesystem blob store
///
/// URLs point at `base_url/{key}` and carry the expiry as a query parameter;
/// whatever serves `base_url` is expected to honour it.
#[derive(Clone)]
pub struct LocalBlobStore {
    base_path: PathBuf,
    base_url: String,
}

impl LocalBlobStore {
    /// Create a new LocalBlobStore instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory holding the blobs (e.g., "./data/blobs")
    /// * `base_url` - Base URL the blobs are served from (e.g., "http://localhost:4000/blobs")
    pub async fn new(base_path: impl Into<PathBuf>, base_url: String) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalBlobStore {
            base_path,
            base_url,
        })
    }

    /// Convert an object key to a filesystem path, rejecting traversal outside the base directory.
    fn key_to_path(&self, object_key: &str) -> StorageResult<PathBuf> {
        if object_key.is_empty() || object_key.contains("..") || object_key.starts_with('/') {
            return Err(StorageError::InvalidKey(format!(
                "Object key {:?} contains invalid characters",
                object_key
            )));
        }

        let path = self.base_path.join(object_key);

        let base_canonical = self.base_path.canonicalize().map_err(|e| {
            StorageError::ConfigError(format!("Failed to canonicalize base path: {}", e))
        })?;

        if let Ok(canonical) = path.canonicalize() {
            if canonical.strip_prefix(&base_canonical).is_err() {
                return Err(StorageError::InvalidKey(
                    "Object key resolves outside storage directory".to_string(),
                ));
            }
        }

        Ok(path)
    }

    fn generate_url(&self, key: &str, expires_in: Duration) -> String {
        let expires_at = Utc::now().timestamp() + expires_in.as_secs() as i64;
        format!(
            "{}/{}?expires={}",
            self.base_url.trim_end_matches('/'),
            key,
            expires_at
        )
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn presigned_url(
        &self,
        object_key: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        let path = self.key_to_path(object_key)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(object_key.to_string()));
        }
        Ok(self.generate_url(object_key, expires_in))
    }

    async fn exists(&self, object_key: &str) -> StorageResult<bool> {
        let path = self.key_to_path(object_key)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}
