//! SA/ML merge engine
//!
//! Correlates the findings of the static-analysis engine with the per-file
//! probabilities of the machine-learning engine and ranks every correlated
//! record as `ERROR`, `WARNING` or `NONE`. The engine is a pure function of
//! its inputs: replaying it on the same stored results yields the same
//! ordered output.
//!
//! Records are correlated by file. SA facades (`file:line`) are split into
//! file and line; ML paths are reduced to the same naming scheme by trimming
//! everything up to and including [`COMPILED_CLASSES_MARKER`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::config::{MERGE_THRESHOLD_HIGH, MERGE_THRESHOLD_LOW};
use crate::models::{normalize_cwe, MlRawResult, RuleTemplateSnapshot, SaResultWithFindings};

pub const COMPILED_CLASSES_MARKER: &str = "WEB-INF/classes/";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MergeError {
    #[error("ML probability {value} for rule {rule} at {file} is not within [0, 1]")]
    InvalidProbability {
        file: String,
        rule: String,
        value: f64,
    },

    #[error("Invalid thresholds: low={low}, high={high}")]
    InvalidThresholds { low: f64, high: f64 },

    #[error("Malformed SA facade: {0}")]
    MalformedFacade(String),
}

/// Classification thresholds. `low` and `high` are compared non-strictly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub low: f64,
    pub high: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            low: MERGE_THRESHOLD_LOW,
            high: MERGE_THRESHOLD_HIGH,
        }
    }
}

impl Thresholds {
    pub fn new(low: f64, high: f64) -> Result<Self, MergeError> {
        let thresholds = Self { low, high };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<(), MergeError> {
        let valid = self.low.is_finite()
            && self.high.is_finite()
            && 0.0 <= self.low
            && self.low <= self.high
            && self.high <= 1.0;
        if valid {
            Ok(())
        } else {
            Err(MergeError::InvalidThresholds {
                low: self.low,
                high: self.high,
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MergeLevel {
    Error,
    Warning,
    None,
}

impl Display for MergeLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MergeLevel::Error => write!(f, "ERROR"),
            MergeLevel::Warning => write!(f, "WARNING"),
            MergeLevel::None => write!(f, "NONE"),
        }
    }
}

/// One correlated defect. Only exists in memory; the filtered list is what gets stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeResult {
    pub cwe: String,
    pub name: String,
    pub file: String,
    pub line_number: Option<u32>,
    pub cross_file: bool,
    pub level: MergeLevel,
    pub ml_probability: Option<f64>,
    pub from_sa: bool,
    pub from_ml: bool,
    pub threshold_low: f64,
    pub threshold_high: f64,
}

impl MergeResult {
    fn from_sa(cwe: &str, name: &str, file: &str, line: u32, cross_file: bool) -> Self {
        Self {
            cwe: cwe.to_string(),
            name: name.to_string(),
            file: file.to_string(),
            line_number: Some(line),
            cross_file,
            level: MergeLevel::None,
            ml_probability: None,
            from_sa: true,
            from_ml: false,
            threshold_low: 0.0,
            threshold_high: 0.0,
        }
    }

    fn from_ml(cwe: &str, name: &str, file: &str, probability: f64) -> Self {
        Self {
            cwe: cwe.to_string(),
            name: name.to_string(),
            file: file.to_string(),
            line_number: None,
            cross_file: false,
            level: MergeLevel::None,
            ml_probability: Some(probability),
            from_sa: false,
            from_ml: true,
            threshold_low: 0.0,
            threshold_high: 0.0,
        }
    }

    /// `file:line`, or the bare file for ML-only records.
    pub fn facade(&self) -> String {
        match self.line_number {
            Some(line) => format!("{}:{}", self.file, line),
            None => self.file.clone(),
        }
    }

    /// Pure classification of this record against `thresholds`.
    pub fn classify(&self, thresholds: &Thresholds) -> MergeLevel {
        let probability_at_least =
            |bound: f64| self.ml_probability.is_some_and(|p| p >= bound);
        let probability_below = |bound: f64| self.ml_probability.is_some_and(|p| p < bound);

        if self.from_sa && self.cross_file {
            MergeLevel::Error
        } else if self.from_sa && !self.from_ml {
            MergeLevel::Error
        } else if self.from_sa && self.from_ml && probability_at_least(thresholds.low) {
            MergeLevel::Error
        } else if !self.from_sa && self.from_ml && probability_at_least(thresholds.high) {
            MergeLevel::Warning
        } else if self.from_sa && self.from_ml && probability_below(thresholds.low) {
            MergeLevel::Warning
        } else {
            MergeLevel::None
        }
    }
}

/// Reduce an absolute ML path to the facade naming scheme used by SA.
pub fn ml_facade(path: &str) -> &str {
    match path.find(COMPILED_CLASSES_MARKER) {
        Some(index) => &path[index + COMPILED_CLASSES_MARKER.len()..],
        None => path,
    }
}

fn split_facade(facade: &str) -> Result<(&str, u32), MergeError> {
    facade
        .rsplit_once(':')
        .and_then(|(file, line)| line.parse().ok().map(|line| (file, line)))
        .filter(|(file, _)| !file.is_empty())
        .ok_or_else(|| MergeError::MalformedFacade(facade.to_string()))
}

/// Correlate SA findings with ML verdicts and classify every record, `NONE` included.
///
/// SA records come first in stored order; ML-only records follow in ML path order.
pub fn correlate(
    sa_results: &[SaResultWithFindings],
    ml_result: &MlRawResult,
    rules: Option<&RuleTemplateSnapshot>,
    thresholds: &Thresholds,
) -> Result<Vec<MergeResult>, MergeError> {
    thresholds.validate()?;

    let mut records: Vec<MergeResult> = Vec::new();
    let mut by_file: HashMap<String, Vec<usize>> = HashMap::new();

    for group in sa_results {
        for finding in &group.detected_results {
            let (file, line) = split_facade(&finding.facade)?;
            let others = &finding.path[..finding.path.len().saturating_sub(1)];
            let cross_file = others.iter().any(|unit| unit.file == file);

            by_file
                .entry(file.to_string())
                .or_default()
                .push(records.len());
            records.push(MergeResult::from_sa(
                &group.result.rule_cwe,
                &group.result.rule_name,
                file,
                line,
                cross_file,
            ));
        }
    }

    for (path, entry) in ml_result.iter().filter(|(_, e)| e.is_success()) {
        let file = ml_facade(path);
        for (rule_key, &probability) in &entry.probabilities {
            if !probability.is_finite() || !(0.0..=1.0).contains(&probability) {
                return Err(MergeError::InvalidProbability {
                    file: path.clone(),
                    rule: rule_key.clone(),
                    value: probability,
                });
            }

            let wanted = normalize_cwe(rule_key);
            let matched = by_file.get(file).and_then(|candidates| {
                candidates
                    .iter()
                    .copied()
                    .find(|&i| records[i].from_sa && normalize_cwe(&records[i].cwe) == wanted)
            });

            match matched {
                Some(index) => {
                    let record = &mut records[index];
                    record.from_ml = true;
                    record.ml_probability = Some(probability);
                }
                None => {
                    let name = rules
                        .and_then(|snapshot| snapshot.name_for_cwe(rule_key))
                        .unwrap_or(rule_key);
                    records.push(MergeResult::from_ml(rule_key, name, file, probability));
                }
            }
        }
    }

    for record in &mut records {
        record.level = record.classify(thresholds);
        record.threshold_low = thresholds.low;
        record.threshold_high = thresholds.high;
    }

    Ok(records)
}

/// Correlate, classify and drop suppressed records.
pub fn merge(
    sa_results: &[SaResultWithFindings],
    ml_result: &MlRawResult,
    rules: Option<&RuleTemplateSnapshot>,
    thresholds: &Thresholds,
) -> Result<Vec<MergeResult>, MergeError> {
    let mut records = correlate(sa_results, ml_result, rules, thresholds)?;
    records.retain(|record| record.level != MergeLevel::None);
    Ok(records)
}
