//! Analyzer contract
//!
//! The pipeline hands every received object to an [`Analyzer`] as decoded
//! pixels plus a metadata map. An analyzer either produces findings, returns
//! `None` ("no result"), or fails; the last two both end the object in
//! `Failed`.

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::models::{Finding, FindingError, Modality};

pub mod decode;
pub mod rules;

pub use decode::{decode_input, DecodeError};
pub use rules::{AnomalyScorer, ModalityRuleAnalyzer, NullScorer};

/// Metadata keys filled by [`decode_input`]
pub mod keys {
    pub const MODALITY: &str = "Modality";
    pub const SOP_INSTANCE_UID: &str = "SOPInstanceUID";
    pub const STUDY_INSTANCE_UID: &str = "StudyInstanceUID";
    pub const SERIES_INSTANCE_UID: &str = "SeriesInstanceUID";
    pub const PATIENT_ID: &str = "PatientID";
    pub const ROWS: &str = "Rows";
    pub const COLUMNS: &str = "Columns";
    pub const WINDOW_CENTER: &str = "WindowCenter";
    pub const WINDOW_WIDTH: &str = "WindowWidth";
}

/// Decoded pixel samples in native little-endian layout
#[derive(Clone, Debug, PartialEq)]
pub struct PixelPayload {
    pub rows: u32,
    pub columns: u32,
    pub frames: u32,
    pub samples_per_pixel: u16,
    pub bits_allocated: u16,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct AnalysisInput {
    pub object_id: String,
    pub modality: Modality,
    pub pixels: PixelPayload,
    pub metadata: BTreeMap<String, String>,
}

impl AnalysisInput {
    pub fn metadata_f64(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(|v| v.trim().parse().ok())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AnalyzerOutput {
    pub findings: Vec<Finding>,
}

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("analyzer failed: {0}")]
    Failed(String),

    #[error("invalid finding: {0}")]
    InvalidFinding(#[from] FindingError),

    #[error("anomaly score {0} is outside [0.0, 1.0]")]
    ScoreOutOfRange(f64),
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Identifier stored with every result
    fn version(&self) -> &str;

    async fn analyze(&self, input: &AnalysisInput) -> Result<Option<AnalyzerOutput>, AnalyzerError>;
}
