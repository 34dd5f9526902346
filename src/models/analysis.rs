use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::models::object::Modality;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        })
    }
}

/// Bounding box of a finding, in pixels
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Region {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum FindingError {
    #[error("confidence {0} is outside [0.0, 1.0]")]
    ConfidenceOutOfRange(f64),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(rename = "type")]
    pub finding_type: String,
    pub description: String,
    pub confidence: f64,
    pub region: Region,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurements: Option<BTreeMap<String, f64>>,
}

impl Finding {
    pub fn new(
        finding_type: impl Into<String>,
        description: impl Into<String>,
        confidence: f64,
        region: Region,
        severity: Severity,
    ) -> Result<Self, FindingError> {
        let finding = Self {
            finding_type: finding_type.into(),
            description: description.into(),
            confidence,
            region,
            severity,
            measurements: None,
        };
        finding.validate()?;
        Ok(finding)
    }

    /// Rejects confidences outside [0.0, 1.0], NaN included
    pub fn validate(&self) -> Result<(), FindingError> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(FindingError::ConfidenceOutOfRange(self.confidence));
        }
        Ok(())
    }

    pub fn with_measurement(mut self, name: impl Into<String>, value: f64) -> Self {
        self.measurements
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value);
        self
    }
}

/// Outcome of a successful analysis, linked 1:1 to an object
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub object_id: String,
    pub modality: Modality,
    pub findings: Vec<Finding>,
    /// Mean of finding confidences, 0.0 without findings
    pub overall_confidence: f64,
    pub processing_time_ms: u64,
    pub analyzer_version: String,
    pub completed_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn new(
        object_id: impl Into<String>,
        modality: Modality,
        findings: Vec<Finding>,
        processing_time: Duration,
        analyzer_version: impl Into<String>,
    ) -> Self {
        Self {
            object_id: object_id.into(),
            modality,
            overall_confidence: mean_confidence(&findings),
            findings,
            processing_time_ms: processing_time.as_millis() as u64,
            analyzer_version: analyzer_version.into(),
            completed_at: Utc::now(),
        }
    }

    pub fn high_severity_count(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::High)
            .count()
    }
}

fn mean_confidence(findings: &[Finding]) -> f64 {
    if findings.is_empty() {
        return 0.0;
    }
    let mean = findings.iter().map(|f| f.confidence).sum::<f64>() / findings.len() as f64;
    mean.clamp(0.0, 1.0)
}
