//! sacentral storage library
//!
//! This crate provides the blob-store abstraction used to hand engines a
//! transient access URL for a stored artifact (uploaded source archives and
//! compiled outputs), with local-filesystem and S3-compatible backends.
//!
//! # Object key format
//!
//! Keys are relative paths such as `source/{file}` or `compiled/{file}`.
//! Keys must not contain `..` or a leading `/`.

pub mod factory;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

pub use factory::create_blob_store;
#[cfg(feature = "storage-local")]
pub use local::LocalBlobStore;
pub use sacentral_core::StorageBackend;
#[cfg(feature = "storage-s3")]
pub use s3::S3BlobStore;
pub use traits::{BlobStore, StorageError, StorageResult};
