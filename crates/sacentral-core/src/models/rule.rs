use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity assigned to a rule in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RuleLevel {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl TryFrom<u8> for RuleLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(RuleLevel::Low),
            2 => Ok(RuleLevel::Medium),
            3 => Ok(RuleLevel::High),
            other => Err(format!("Invalid rule level: {}", other)),
        }
    }
}

impl From<RuleLevel> for u8 {
    fn from(level: RuleLevel) -> Self {
        level as u8
    }
}

/// A rule as it lives in the mutable catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: Uuid,
    pub name: String,
    pub cwe: String,
    pub category: String,
    pub level: RuleLevel,
    pub source: Vec<String>,
    pub sink: Vec<String>,
    pub enabled: bool,
    pub deleted: bool,
}

impl Rule {
    pub fn is_active(&self) -> bool {
        self.enabled && !self.deleted
    }

    pub fn snapshot(&self) -> RuleSnapshot {
        RuleSnapshot {
            rule_id: self.id,
            name: self.name.clone(),
            cwe: self.cwe.clone(),
            category: self.category.clone(),
            level: self.level,
            source: self.source.clone(),
            sink: self.sink.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleTemplate {
    pub id: Uuid,
    pub name: String,
    pub rule_ids: Vec<Uuid>,
    pub enabled: bool,
    pub is_default: bool,
}

/// Immutable copy of a rule taken when the analysis stage is dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSnapshot {
    pub rule_id: Uuid,
    pub name: String,
    pub cwe: String,
    pub category: String,
    pub level: RuleLevel,
    pub source: Vec<String>,
    pub sink: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTemplateSnapshot {
    pub rule_template_id: Uuid,
    pub rule_template_name: String,
    pub rules: Vec<RuleSnapshot>,
    pub captured_at: DateTime<Utc>,
}

impl RuleTemplateSnapshot {
    pub fn capture(template: &RuleTemplate, rules: &[Rule], at: DateTime<Utc>) -> Self {
        Self {
            rule_template_id: template.id,
            rule_template_name: template.name.clone(),
            rules: rules.iter().map(Rule::snapshot).collect(),
            captured_at: at,
        }
    }

    /// Rule name for a CWE identifier in any of its spellings.
    pub fn name_for_cwe(&self, cwe: &str) -> Option<&str> {
        let wanted = normalize_cwe(cwe);
        self.rules
            .iter()
            .find(|r| normalize_cwe(&r.cwe) == wanted)
            .map(|r| r.name.as_str())
    }
}

/// Canonical form of a CWE identifier: `CWE-78`, `cwe78` and `78` all become `78`.
///
/// Identifiers without a numeric part are lowercased and returned trimmed.
pub fn normalize_cwe(raw: &str) -> String {
    let trimmed = raw.trim();
    let lower = trimmed.to_ascii_lowercase();
    let rest = lower.strip_prefix("cwe").unwrap_or(&lower);
    let rest = rest.trim_start_matches(['-', '_', ' ']);
    if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()) {
        let digits = rest.trim_start_matches('0');
        if digits.is_empty() {
            "0".to_string()
        } else {
            digits.to_string()
        }
    } else {
        lower
    }
}
