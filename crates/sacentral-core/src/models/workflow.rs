use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use crate::config::{ENGINE_MAX_MEMORY_GB, ENGINE_TIMEOUT_MINUTES};
use crate::error::AppError;
use crate::models::task::TaskKind;

/// Pipeline stage a dispatch handler is responsible for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Compile,
    Analysis,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Stage::Compile => write!(f, "compile"),
            Stage::Analysis => write!(f, "analysis"),
        }
    }
}

const COMPILE_THEN_ANALYSIS: &[Stage] = &[Stage::Compile, Stage::Analysis];
const COMPILE_ONLY: &[Stage] = &[Stage::Compile];
const ANALYSIS_ONLY: &[Stage] = &[Stage::Analysis];

/// The fixed catalog of pipeline shapes.
///
/// Each shape has a stable numeric code used on the wire and in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    Compile,
    CompileSa,
    CompileSaMl,
    Sa,
    Ml,
    SaMl,
}

impl WorkflowType {
    pub const ALL: [WorkflowType; 6] = [
        WorkflowType::Compile,
        WorkflowType::CompileSa,
        WorkflowType::CompileSaMl,
        WorkflowType::Sa,
        WorkflowType::Ml,
        WorkflowType::SaMl,
    ];

    pub fn code(&self) -> i16 {
        match self {
            WorkflowType::Compile => 1,
            WorkflowType::CompileSa => 2,
            WorkflowType::CompileSaMl => 3,
            WorkflowType::Sa => 4,
            WorkflowType::Ml => 5,
            WorkflowType::SaMl => 6,
        }
    }

    /// Returns `None` for codes outside the catalog.
    pub fn from_code(code: i16) -> Option<Self> {
        WorkflowType::ALL.into_iter().find(|t| t.code() == code)
    }

    /// Ordered stages of this shape. Indexed by workflow progress.
    pub fn stages(&self) -> &'static [Stage] {
        match self {
            WorkflowType::Compile => COMPILE_ONLY,
            WorkflowType::CompileSa | WorkflowType::CompileSaMl => COMPILE_THEN_ANALYSIS,
            WorkflowType::Sa | WorkflowType::Ml | WorkflowType::SaMl => ANALYSIS_ONLY,
        }
    }

    pub fn steps(&self) -> u32 {
        self.stages().len() as u32
    }

    pub fn stage_at(&self, progress: u32) -> Option<Stage> {
        self.stages().get(progress as usize).copied()
    }

    pub fn runs_compile(&self) -> bool {
        self.stages().contains(&Stage::Compile)
    }

    pub fn runs_sa(&self) -> bool {
        matches!(
            self,
            WorkflowType::CompileSa
                | WorkflowType::CompileSaMl
                | WorkflowType::Sa
                | WorkflowType::SaMl
        )
    }

    pub fn runs_ml(&self) -> bool {
        matches!(
            self,
            WorkflowType::CompileSaMl | WorkflowType::Ml | WorkflowType::SaMl
        )
    }

    pub fn requires_rules(&self) -> bool {
        self.runs_sa() || self.runs_ml()
    }

    /// Analysis-only shapes start from an already compiled artifact.
    pub fn requires_compiled_input(&self) -> bool {
        !self.runs_compile()
    }

    pub fn task_kind(&self) -> Option<TaskKind> {
        match (self.runs_sa(), self.runs_ml()) {
            (true, true) => Some(TaskKind::SaMl),
            (true, false) => Some(TaskKind::Sa),
            (false, true) => Some(TaskKind::Ml),
            (false, false) => None,
        }
    }
}

impl Display for WorkflowType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            WorkflowType::Compile => write!(f, "compile"),
            WorkflowType::CompileSa => write!(f, "compile_sa"),
            WorkflowType::CompileSaMl => write!(f, "compile_sa_ml"),
            WorkflowType::Sa => write!(f, "sa"),
            WorkflowType::Ml => write!(f, "ml"),
            WorkflowType::SaMl => write!(f, "sa_ml"),
        }
    }
}

impl FromStr for WorkflowType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compile" => Ok(WorkflowType::Compile),
            "compile_sa" => Ok(WorkflowType::CompileSa),
            "compile_sa_ml" => Ok(WorkflowType::CompileSaMl),
            "sa" => Ok(WorkflowType::Sa),
            "ml" => Ok(WorkflowType::Ml),
            "sa_ml" => Ok(WorkflowType::SaMl),
            _ => Err(anyhow::anyhow!("Invalid workflow type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Complete,
    Aborted,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkflowStatus::Running)
    }

    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        matches!(
            (self, next),
            (WorkflowStatus::Running, WorkflowStatus::Complete)
                | (WorkflowStatus::Running, WorkflowStatus::Aborted)
        )
    }

    pub fn transition(self, next: WorkflowStatus) -> Result<WorkflowStatus, AppError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(AppError::invalid_transition("workflow", self, next))
        }
    }
}

impl Display for WorkflowStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::Complete => write!(f, "complete"),
            WorkflowStatus::Aborted => write!(f, "aborted"),
        }
    }
}

impl FromStr for WorkflowStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(WorkflowStatus::Running),
            "complete" => Ok(WorkflowStatus::Complete),
            "aborted" => Ok(WorkflowStatus::Aborted),
            _ => Err(anyhow::anyhow!("Invalid workflow status: {}", s)),
        }
    }
}

/// Engine-side limits forwarded in analysis payloads. Enforced by the engines only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct EngineLimits {
    #[validate(range(min = 1, max = 30))]
    pub timeout_minutes: u32,
    #[validate(range(min = 1, max = 16))]
    pub max_memory_gb: u32,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            timeout_minutes: ENGINE_TIMEOUT_MINUTES,
            max_memory_gb: ENGINE_MAX_MEMORY_GB,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub workflow_type: WorkflowType,
    pub status: WorkflowStatus,
    pub steps: u32,
    pub progress: u32,
    pub task_id: Uuid,
    pub code_id: Uuid,
    pub rule_template_id: Option<Uuid>,
    pub trigger: String,
    pub limits: EngineLimits,
    /// One timestamp per completed stage, in completion order.
    pub timeline: Vec<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(
        workflow_type: WorkflowType,
        task_id: Uuid,
        code_id: Uuid,
        rule_template_id: Option<Uuid>,
        trigger: impl Into<String>,
        limits: EngineLimits,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workflow_type,
            status: WorkflowStatus::Running,
            steps: workflow_type.steps(),
            progress: 0,
            task_id,
            code_id,
            rule_template_id,
            trigger: trigger.into(),
            limits,
            timeline: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == WorkflowStatus::Running
    }

    pub fn is_fully_progressed(&self) -> bool {
        self.progress >= self.steps
    }

    /// Stage to dispatch next, or `None` when every stage has run.
    pub fn next_stage(&self) -> Option<Stage> {
        if self.is_fully_progressed() {
            return None;
        }
        self.workflow_type.stage_at(self.progress)
    }
}
