//! Shared application state handed to every handler

use sacentral_core::models::EngineLimits;
use sacentral_core::StorageBackend;
use sacentral_services::{CompletionProcessor, PipelineContext, WorkflowService};

pub struct AppState {
    pub workflows: WorkflowService,
    /// Same processor the completion consumer drives.
    pub processor: CompletionProcessor,
    pub default_limits: EngineLimits,
    pub blob_backend: StorageBackend,
}

impl AppState {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            default_limits: ctx.default_limits,
            blob_backend: ctx.blobs.backend_type(),
            workflows: WorkflowService::new(ctx.clone()),
            processor: CompletionProcessor::new(ctx),
        }
    }
}
