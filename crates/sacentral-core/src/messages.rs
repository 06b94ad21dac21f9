//! Engine wire messages
//!
//! Outbound dispatch payloads (orchestrator to engine queue) and inbound
//! completion messages (engine to orchestrator). Every inbound message is
//! validated at the boundary before any state is touched.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{MlRawResult, PathUnit, RuleLevel, RuleSnapshot};

/// Named queues behind the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    SaCompile,
    SaEngine,
    MlEngine,
    CompileFinish,
    SaFinish,
    MlFinish,
}

impl QueueName {
    pub const COMPLETION: [QueueName; 3] = [
        QueueName::CompileFinish,
        QueueName::SaFinish,
        QueueName::MlFinish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::SaCompile => "sa_compile",
            QueueName::SaEngine => "sa_engine",
            QueueName::MlEngine => "ml_engine",
            QueueName::CompileFinish => "compile_finish",
            QueueName::SaFinish => "sa_finish",
            QueueName::MlFinish => "ml_finish",
        }
    }

    pub fn is_completion(&self) -> bool {
        QueueName::COMPLETION.contains(self)
    }
}

impl Display for QueueName {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sa_compile" => Ok(QueueName::SaCompile),
            "sa_engine" => Ok(QueueName::SaEngine),
            "ml_engine" => Ok(QueueName::MlEngine),
            "compile_finish" => Ok(QueueName::CompileFinish),
            "sa_finish" => Ok(QueueName::SaFinish),
            "ml_finish" => Ok(QueueName::MlFinish),
            _ => Err(anyhow::anyhow!("Invalid queue name: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilePayload {
    pub workflow_id: Uuid,
    pub source: String,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineRule {
    pub id: Uuid,
    pub name: String,
    pub cwe: String,
    pub category: String,
    pub level: RuleLevel,
    pub source: Vec<String>,
    pub sink: Vec<String>,
}

impl From<&RuleSnapshot> for EngineRule {
    fn from(rule: &RuleSnapshot) -> Self {
        Self {
            id: rule.rule_id,
            name: rule.name.clone(),
            cwe: rule.cwe.clone(),
            category: rule.category.clone(),
            level: rule.level,
            source: rule.source.clone(),
            sink: rule.sink.clone(),
        }
    }
}

/// Shared payload of the SA and ML analysis queues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisPayload {
    pub workflow_id: Uuid,
    pub task_id: Uuid,
    pub source: String,
    pub filename: String,
    pub rules: Vec<EngineRule>,
    /// Gigabytes.
    pub max_memory: u32,
    /// Minutes.
    pub timeout: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineRequest {
    Compile(CompilePayload),
    SaAnalyze(AnalysisPayload),
    MlAnalyze(AnalysisPayload),
}

impl EngineRequest {
    pub fn queue(&self) -> QueueName {
        match self {
            EngineRequest::Compile(_) => QueueName::SaCompile,
            EngineRequest::SaAnalyze(_) => QueueName::SaEngine,
            EngineRequest::MlAnalyze(_) => QueueName::MlEngine,
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value, AppError> {
        let value = match self {
            EngineRequest::Compile(payload) => serde_json::to_value(payload)?,
            EngineRequest::SaAnalyze(payload) | EngineRequest::MlAnalyze(payload) => {
                serde_json::to_value(payload)?
            }
        };
        Ok(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileArtifact {
    pub name: String,
    pub size: u64,
    pub object_key: String,
    pub md5: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileFinished {
    pub workflow_id: Uuid,
    pub success: bool,
    #[serde(default)]
    pub compile_result: Option<CompileArtifact>,
}

impl CompileFinished {
    pub fn validate(&self) -> Result<(), AppError> {
        if !self.success {
            return Ok(());
        }
        match &self.compile_result {
            None => Err(AppError::InvalidMessage(
                "successful compile-finish without compileResult".to_string(),
            )),
            Some(artifact) if artifact.object_key.trim().is_empty() => Err(
                AppError::InvalidMessage("compileResult.objectKey is empty".to_string()),
            ),
            Some(_) => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaFinding {
    pub source_sig: String,
    pub sink_sig: String,
    pub path: Vec<PathUnit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaRuleResult {
    pub rule_name: String,
    pub rule_cwe: String,
    #[serde(default)]
    pub rule_category: String,
    pub rule_level: RuleLevel,
    #[serde(default)]
    pub detected_results: Vec<SaFinding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaFinished {
    pub workflow_id: Uuid,
    pub task_id: Uuid,
    pub success: bool,
    /// Matched rules keyed by rule id.
    #[serde(default)]
    pub result: Option<BTreeMap<String, SaRuleResult>>,
}

impl SaFinished {
    pub fn validate(&self) -> Result<(), AppError> {
        if !self.success {
            return Ok(());
        }
        let Some(result) = &self.result else {
            return Err(AppError::InvalidMessage(
                "successful sa-finish without result".to_string(),
            ));
        };
        for (rule_id, rule) in result {
            if rule.detected_results.iter().any(|f| f.path.is_empty()) {
                return Err(AppError::InvalidMessage(format!(
                    "rule {} has a finding with an empty path",
                    rule_id
                )));
            }
        }
        Ok(())
    }

    pub fn finding_count(&self) -> usize {
        self.result
            .as_ref()
            .map(|r| r.values().map(|rule| rule.detected_results.len()).sum())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MlFinished {
    pub workflow_id: Uuid,
    pub task_id: Uuid,
    pub success: bool,
    #[serde(default)]
    pub result: Option<MlRawResult>,
}

impl MlFinished {
    pub fn validate(&self) -> Result<(), AppError> {
        if !self.success {
            return Ok(());
        }
        let Some(result) = &self.result else {
            return Err(AppError::InvalidMessage(
                "successful ml-finish without result".to_string(),
            ));
        };
        for (file, entry) in result.iter().filter(|(_, e)| e.is_success()) {
            for (rule, probability) in &entry.probabilities {
                if !probability.is_finite() || !(0.0..=1.0).contains(probability) {
                    return Err(AppError::InvalidMessage(format!(
                        "probability {} for {} at {} is outside [0, 1]",
                        probability, rule, file
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A validated inbound completion message
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionMessage {
    CompileFinished(CompileFinished),
    SaFinished(SaFinished),
    MlFinished(MlFinished),
}

impl CompletionMessage {
    /// Decode and validate a message body received on a completion queue.
    pub fn parse(queue: QueueName, body: &serde_json::Value) -> Result<Self, AppError> {
        let message = match queue {
            QueueName::CompileFinish => {
                CompletionMessage::CompileFinished(serde_json::from_value(body.clone())?)
            }
            QueueName::SaFinish => CompletionMessage::SaFinished(serde_json::from_value(body.clone())?),
            QueueName::MlFinish => CompletionMessage::MlFinished(serde_json::from_value(body.clone())?),
            other => {
                return Err(AppError::InvalidMessage(format!(
                    "{} is not a completion queue",
                    other
                )))
            }
        };
        message.validate()?;
        Ok(message)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        match self {
            CompletionMessage::CompileFinished(m) => m.validate(),
            CompletionMessage::SaFinished(m) => m.validate(),
            CompletionMessage::MlFinished(m) => m.validate(),
        }
    }

    pub fn workflow_id(&self) -> Uuid {
        match self {
            CompletionMessage::CompileFinished(m) => m.workflow_id,
            CompletionMessage::SaFinished(m) => m.workflow_id,
            CompletionMessage::MlFinished(m) => m.workflow_id,
        }
    }

    pub fn queue(&self) -> QueueName {
        match self {
            CompletionMessage::CompileFinished(_) => QueueName::CompileFinish,
            CompletionMessage::SaFinished(_) => QueueName::SaFinish,
            CompletionMessage::MlFinished(_) => QueueName::MlFinish,
        }
    }
}
