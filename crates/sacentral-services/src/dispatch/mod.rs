//! Stage dispatch handlers
//!
//! Each pipeline stage has one handler that persists whatever must exist
//! before the engine is contacted and then publishes a single request per
//! engine. Replies arrive later on the completion queues.

mod analysis;
mod compile;

use async_trait::async_trait;

use sacentral_core::models::{Stage, Workflow, WorkflowType};
use sacentral_core::{AppError, QueueName};

use crate::context::PipelineContext;

pub use analysis::AnalysisHandler;
pub use compile::CompileHandler;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Requests were published to these queues.
    Dispatched(Vec<QueueName>),
    /// The stage ended the workflow without contacting any engine.
    Aborted,
    /// The stage had already been dispatched for this task; nothing was sent.
    AlreadyDispatched,
}

#[async_trait]
pub trait StageHandler: Send + Sync {
    fn stage(&self) -> Stage;

    async fn dispatch(
        &self,
        ctx: &PipelineContext,
        workflow: &Workflow,
    ) -> Result<DispatchOutcome, AppError>;
}

static COMPILE: CompileHandler = CompileHandler;
static ANALYSIS: AnalysisHandler = AnalysisHandler;

fn handler_for(stage: Stage) -> &'static dyn StageHandler {
    match stage {
        Stage::Compile => &COMPILE,
        Stage::Analysis => &ANALYSIS,
    }
}

/// Handler for the next stage of `workflow`.
///
/// `None` means every stage has run: callers must stop chaining.
pub fn next_handler(workflow: &Workflow) -> Option<&'static dyn StageHandler> {
    workflow.next_stage().map(handler_for)
}

/// Handler for a stored workflow type code at `progress`.
///
/// `None` when the code is outside the catalog or `progress` has reached the step count.
pub fn handler_for_code(type_code: i16, progress: u32) -> Option<&'static dyn StageHandler> {
    WorkflowType::from_code(type_code)?
        .stage_at(progress)
        .map(handler_for)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sacentral_core::models::EngineLimits;
    use uuid::Uuid;

    fn workflow(workflow_type: WorkflowType, progress: u32) -> Workflow {
        let mut workflow = Workflow::new(
            workflow_type,
            Uuid::new_v4(),
            Uuid::new_v4(),
            None,
            "upload",
            EngineLimits::default(),
        );
        workflow.progress = progress;
        workflow
    }

    #[test]
    fn test_next_handler_follows_stage_table() {
        let stages = |t: WorkflowType, p: u32| next_handler(&workflow(t, p)).map(|h| h.stage());

        assert_eq!(stages(WorkflowType::Compile, 0), Some(Stage::Compile));
        assert_eq!(stages(WorkflowType::Compile, 1), None);
        assert_eq!(stages(WorkflowType::CompileSaMl, 0), Some(Stage::Compile));
        assert_eq!(stages(WorkflowType::CompileSaMl, 1), Some(Stage::Analysis));
        assert_eq!(stages(WorkflowType::CompileSaMl, 2), None);
        assert_eq!(stages(WorkflowType::SaMl, 0), Some(Stage::Analysis));
        assert_eq!(stages(WorkflowType::Ml, 1), None);
    }

    #[test]
    fn test_next_handler_none_exactly_when_fully_progressed() {
        for workflow_type in WorkflowType::ALL {
            for progress in 0..=workflow_type.steps() {
                let wf = workflow(workflow_type, progress);
                assert_eq!(
                    next_handler(&wf).is_none(),
                    progress == workflow_type.steps(),
                    "{} at {}",
                    workflow_type,
                    progress
                );
            }
        }
    }

    #[test]
    fn test_unrecognized_type_code_has_no_handler() {
        assert!(handler_for_code(0, 0).is_none());
        assert!(handler_for_code(7, 0).is_none());
        assert_eq!(
            handler_for_code(WorkflowType::CompileSa.code(), 1).map(|h| h.stage()),
            Some(Stage::Analysis)
        );
    }
}
