use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::AppError;
use crate::merge::MergeResult;
use crate::models::result::MlRawResult;
use crate::models::rule::RuleTemplateSnapshot;

/// SA progress recorded once the compile stage has produced an artifact.
pub const COMPILED_SA_PROGRESS: u8 = 20;
pub const FINISHED_PROGRESS: u8 = 100;

/// Which engines a task runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Sa,
    Ml,
    SaMl,
}

impl TaskKind {
    pub fn code(&self) -> i16 {
        match self {
            TaskKind::Sa => 1,
            TaskKind::Ml => 2,
            TaskKind::SaMl => 3,
        }
    }

    pub fn includes_sa(&self) -> bool {
        matches!(self, TaskKind::Sa | TaskKind::SaMl)
    }

    pub fn includes_ml(&self) -> bool {
        matches!(self, TaskKind::Ml | TaskKind::SaMl)
    }
}

impl Display for TaskKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TaskKind::Sa => write!(f, "sa"),
            TaskKind::Ml => write!(f, "ml"),
            TaskKind::SaMl => write!(f, "sa_ml"),
        }
    }
}

impl FromStr for TaskKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sa" => Ok(TaskKind::Sa),
            "ml" => Ok(TaskKind::Ml),
            "sa_ml" => Ok(TaskKind::SaMl),
            _ => Err(anyhow::anyhow!("Invalid task kind: {}", s)),
        }
    }
}

/// Status of one engine sub-pipeline (SA or ML) of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubPipelineStatus {
    Pending,
    Running,
    Success,
    Exception,
}

impl SubPipelineStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubPipelineStatus::Success | SubPipelineStatus::Exception)
    }

    pub fn can_transition_to(&self, next: SubPipelineStatus) -> bool {
        use SubPipelineStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Exception) | (Running, Success) | (Running, Exception)
        )
    }

    pub fn transition(self, next: SubPipelineStatus) -> Result<SubPipelineStatus, AppError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(AppError::invalid_transition("sub-pipeline", self, next))
        }
    }

    pub fn from_success(success: bool) -> Self {
        if success {
            SubPipelineStatus::Success
        } else {
            SubPipelineStatus::Exception
        }
    }
}

impl Display for SubPipelineStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            SubPipelineStatus::Pending => write!(f, "pending"),
            SubPipelineStatus::Running => write!(f, "running"),
            SubPipelineStatus::Success => write!(f, "success"),
            SubPipelineStatus::Exception => write!(f, "exception"),
        }
    }
}

impl FromStr for SubPipelineStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SubPipelineStatus::Pending),
            "running" => Ok(SubPipelineStatus::Running),
            "success" => Ok(SubPipelineStatus::Success),
            "exception" => Ok(SubPipelineStatus::Exception),
            _ => Err(anyhow::anyhow!("Invalid sub-pipeline status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaPipeline {
    pub status: SubPipelineStatus,
    pub progress: u8,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub result_ids: Vec<Uuid>,
    pub weakness_count: u32,
}

impl Default for SaPipeline {
    fn default() -> Self {
        Self {
            status: SubPipelineStatus::Pending,
            progress: 0,
            started_at: None,
            ended_at: None,
            result_ids: Vec::new(),
            weakness_count: 0,
        }
    }
}

impl SaPipeline {
    pub fn started(&self, at: DateTime<Utc>) -> Result<Self, AppError> {
        Ok(Self {
            status: self.status.transition(SubPipelineStatus::Running)?,
            started_at: Some(at),
            ..self.clone()
        })
    }

    pub fn finished(
        &self,
        success: bool,
        result_ids: Vec<Uuid>,
        weakness_count: u32,
        at: DateTime<Utc>,
    ) -> Result<Self, AppError> {
        Ok(Self {
            status: self
                .status
                .transition(SubPipelineStatus::from_success(success))?,
            progress: FINISHED_PROGRESS,
            started_at: self.started_at,
            ended_at: Some(at),
            result_ids,
            weakness_count,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlPipeline {
    pub status: SubPipelineStatus,
    pub progress: u8,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub raw_result: Option<MlRawResult>,
}

impl Default for MlPipeline {
    fn default() -> Self {
        Self {
            status: SubPipelineStatus::Pending,
            progress: 0,
            started_at: None,
            ended_at: None,
            raw_result: None,
        }
    }
}

impl MlPipeline {
    pub fn started(&self, at: DateTime<Utc>) -> Result<Self, AppError> {
        Ok(Self {
            status: self.status.transition(SubPipelineStatus::Running)?,
            started_at: Some(at),
            ..self.clone()
        })
    }

    pub fn finished(
        &self,
        success: bool,
        raw_result: Option<MlRawResult>,
        at: DateTime<Utc>,
    ) -> Result<Self, AppError> {
        Ok(Self {
            status: self
                .status
                .transition(SubPipelineStatus::from_success(success))?,
            progress: FINISHED_PROGRESS,
            started_at: self.started_at,
            ended_at: Some(at),
            raw_result,
        })
    }
}

/// Merged output of a task.
///
/// Distinguishes "merge never ran" from "merge ran and found nothing".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SummaryResult {
    #[default]
    NotRun,
    Empty {
        merged_at: DateTime<Utc>,
    },
    Populated {
        merged_at: DateTime<Utc>,
        results: Vec<MergeResult>,
    },
}

impl SummaryResult {
    pub fn from_results(results: Vec<MergeResult>, merged_at: DateTime<Utc>) -> Self {
        if results.is_empty() {
            SummaryResult::Empty { merged_at }
        } else {
            SummaryResult::Populated { merged_at, results }
        }
    }

    pub fn results(&self) -> &[MergeResult] {
        match self {
            SummaryResult::Populated { results, .. } => results,
            _ => &[],
        }
    }

    pub fn has_run(&self) -> bool {
        !matches!(self, SummaryResult::NotRun)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub trigger: String,
    pub code_id: Uuid,
    pub target_object_name: String,
    /// Object key of the compiled artifact the engines analyse.
    pub target_object_key: Option<String>,
    pub kind: Option<TaskKind>,
    pub sa: SaPipeline,
    pub ml: MlPipeline,
    pub rule_snapshot: Option<RuleTemplateSnapshot>,
    pub summary: SummaryResult,
    pub merge_claimed: bool,
    pub weakness_count: u32,
    pub audit_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        code_id: Uuid,
        trigger: impl Into<String>,
        target_object_name: impl Into<String>,
        target_object_key: Option<String>,
        kind: Option<TaskKind>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            trigger: trigger.into(),
            code_id,
            target_object_name: target_object_name.into(),
            target_object_key,
            kind,
            sa: SaPipeline::default(),
            ml: MlPipeline::default(),
            rule_snapshot: None,
            summary: SummaryResult::NotRun,
            merge_claimed: false,
            weakness_count: 0,
            audit_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn runs_sa(&self) -> bool {
        self.kind.is_some_and(|k| k.includes_sa())
    }

    pub fn runs_ml(&self) -> bool {
        self.kind.is_some_and(|k| k.includes_ml())
    }

    pub fn is_combined(&self) -> bool {
        self.kind == Some(TaskKind::SaMl)
    }

    pub fn both_succeeded(&self) -> bool {
        self.sa.status == SubPipelineStatus::Success && self.ml.status == SubPipelineStatus::Success
    }

    pub fn both_terminal(&self) -> bool {
        self.sa.status.is_terminal() && self.ml.status.is_terminal()
    }
}
