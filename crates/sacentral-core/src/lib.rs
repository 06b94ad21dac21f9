//! sacentral core library
//!
//! This crate provides the domain models, engine wire messages, the SA/ML merge
//! engine, error types and configuration shared by all sacentral components.

pub mod config;
pub mod error;
pub mod merge;
pub mod messages;
pub mod models;

// Re-export commonly used types
pub use config::{AnalysisConfig, BaseConfig, Config, StorageBackend};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use merge::{merge, MergeError, MergeLevel, MergeResult, Thresholds};
pub use messages::{CompletionMessage, EngineRequest, QueueName};
