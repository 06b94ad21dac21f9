//! sacentral orchestration core
//!
//! This crate drives a task through its pipeline. Dispatch handlers in
//! [`dispatch`] send one engine request per stage; the processors in
//! [`completion`] consume engine replies, advance the workflow, chain the next
//! stage and trigger the merge once both analyses succeeded. Thin HTTP
//! handling stays in sacentral-api.

pub mod completion;
pub mod context;
pub mod dispatch;
pub mod merge;
pub mod workflow;

pub use completion::CompletionProcessor;
pub use context::PipelineContext;
pub use dispatch::{next_handler, AnalysisHandler, CompileHandler, DispatchOutcome, StageHandler};
pub use merge::MergeService;
pub use workflow::{AuditRequest, RegisterCode, StartWorkflow, WorkflowService};
