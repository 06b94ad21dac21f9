use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::rule::RuleLevel;

/// HTTP-like status the ML engine reports for a file it analysed successfully.
pub const ML_ENTRY_SUCCESS: u16 = 200;

/// One statement along a taint path reported by the SA engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathUnit {
    pub file: String,
    #[serde(default)]
    pub function: String,
    #[serde(default)]
    pub jimple_stmt: String,
    #[serde(default)]
    pub java_stmt: String,
    #[serde(default)]
    pub jsp_stmt: String,
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsp_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub java_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsp_file: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleType {
    Confirmed,
    FalsePositive,
    WontFix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    Mandatory,
    Recommended,
}

/// Reviewer verdict on a finding. The only part of a finding that changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Audit {
    pub handle_type: HandleType,
    pub audit_level: AuditLevel,
    #[serde(default)]
    pub memo: String,
    pub audited_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedResult {
    pub id: Uuid,
    pub task_id: Uuid,
    pub source_sig: String,
    pub sink_sig: String,
    pub path: Vec<PathUnit>,
    /// `{file}:{line}` of the last path unit.
    pub facade: String,
    pub audit: Option<Audit>,
}

impl DetectedResult {
    pub fn new(task_id: Uuid, source_sig: String, sink_sig: String, path: Vec<PathUnit>) -> Self {
        let facade = facade_of(&path);
        Self {
            id: Uuid::new_v4(),
            task_id,
            source_sig,
            sink_sig,
            path,
            facade,
            audit: None,
        }
    }
}

/// Facade of a path: the file and line of its last statement.
pub fn facade_of(path: &[PathUnit]) -> String {
    match path.last() {
        Some(unit) => format!("{}:{}", unit.file, unit.line),
        None => String::new(),
    }
}

/// Grouping record: one per matched rule of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaResult {
    pub id: Uuid,
    pub task_id: Uuid,
    pub rule_id: String,
    pub rule_name: String,
    pub rule_cwe: String,
    pub rule_category: String,
    pub rule_level: RuleLevel,
    pub detected_result_ids: Vec<Uuid>,
}

/// A grouping record with its findings loaded, in stored order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaResultWithFindings {
    #[serde(flatten)]
    pub result: SaResult,
    pub detected_results: Vec<DetectedResult>,
}

/// Per-file verdict of the ML engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlFileResult {
    pub status: u16,
    /// Rule key to probability.
    #[serde(flatten)]
    pub probabilities: BTreeMap<String, f64>,
}

impl MlFileResult {
    pub fn is_success(&self) -> bool {
        self.status == ML_ENTRY_SUCCESS
    }
}

/// Raw ML result keyed by absolute file path, as reported by the engine.
pub type MlRawResult = BTreeMap<String, MlFileResult>;

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(file: &str, line: u32) -> PathUnit {
        PathUnit {
            file: file.to_string(),
            function: "doGet".to_string(),
            jimple_stmt: String::new(),
            java_stmt: String::new(),
            jsp_stmt: String::new(),
            line,
            jsp_line: None,
            java_class: None,
            jsp_file: None,
        }
    }

    #[test]
    fn test_facade_uses_last_path_unit() {
        let finding = DetectedResult::new(
            Uuid::new_v4(),
            "src".to_string(),
            "sink".to_string(),
            vec![unit("a/Login.java", 10), unit("a/Db.java", 42)],
        );
        assert_eq!(finding.facade, "a/Db.java:42");
        assert!(finding.audit.is_none());
    }

    #[test]
    fn test_path_unit_camel_case_wire_names() {
        let json = serde_json::json!({
            "file": "org/apache/jsp/welcome_jsp.java",
            "function": "_jspService",
            "jimpleStmt": "r1 = ...",
            "javaStmt": "Runtime.exec(cmd)",
            "jspStmt": "",
            "line": 144,
            "jspLine": 12
        });
        let parsed: PathUnit = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.line, 144);
        assert_eq!(parsed.jsp_line, Some(12));
        assert_eq!(parsed.java_stmt, "Runtime.exec(cmd)");
    }

    #[test]
    fn test_ml_file_result_flattens_probabilities() {
        let json = serde_json::json!({"status": 200, "cwe78": 0.9993, "cwe89": 0.1});
        let parsed: MlFileResult = serde_json::from_value(json).unwrap();
        assert!(parsed.is_success());
        assert_eq!(parsed.probabilities.len(), 2);
        assert_eq!(parsed.probabilities["cwe78"], 0.9993);
    }
}
