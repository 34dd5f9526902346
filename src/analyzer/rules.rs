use async_trait::async_trait;

use crate::analyzer::{AnalysisInput, Analyzer, AnalyzerError, AnalyzerOutput};
use crate::models::{Finding, Modality, Region, Severity};

/// Produces an anomaly probability in [0, 1] for one image
#[async_trait]
pub trait AnomalyScorer: Send + Sync {
    fn name(&self) -> &str;

    async fn score(&self, input: &AnalysisInput) -> Result<f64, AnalyzerError>;
}

/// Scorer used when no model is configured; never reports an anomaly
#[derive(Debug, Default, Clone, Copy)]
pub struct NullScorer;

#[async_trait]
impl AnomalyScorer for NullScorer {
    fn name(&self) -> &str {
        "null"
    }

    async fn score(&self, _input: &AnalysisInput) -> Result<f64, AnalyzerError> {
        Ok(0.0)
    }
}

/// Turns an anomaly score into at most one modality-specific finding
pub struct ModalityRuleAnalyzer<S> {
    scorer: S,
    threshold: f64,
    version: String,
}

impl<S: AnomalyScorer> ModalityRuleAnalyzer<S> {
    pub fn new(scorer: S, threshold: f64, version: impl Into<String>) -> Self {
        Self {
            scorer,
            threshold,
            version: version.into(),
        }
    }

    pub fn scorer(&self) -> &S {
        &self.scorer
    }

    /// Finding for `score`, or `None` when it does not clear the threshold
    pub fn finding_for(&self, modality: Modality, score: f64) -> Result<Option<Finding>, AnalyzerError> {
        if !(0.0..=1.0).contains(&score) {
            return Err(AnalyzerError::ScoreOutOfRange(score));
        }
        if score <= self.threshold {
            return Ok(None);
        }

        let finding = match modality {
            Modality::CT => Finding::new(
                "pulmonary_nodule",
                format!("Suspicious pulmonary nodule detected (confidence {:.2}).", score),
                score,
                Region::new(100.0, 150.0, 25.0, 25.0),
                if score > 0.9 { Severity::Medium } else { Severity::Low },
            )?
            .with_measurement("diameter_mm", 12.5)
            .with_measurement("volume_mm3", 817.5),
            Modality::MR => Finding::new(
                "brain_lesion",
                format!("Brain lesion detected (confidence {:.2}).", score),
                score,
                Region::new(200.0, 180.0, 30.0, 30.0),
                if score > 0.95 { Severity::High } else { Severity::Medium },
            )?
            .with_measurement("diameter_mm", 15.2),
            Modality::DX => Finding::new(
                "pulmonary_opacity",
                format!("Pulmonary opacity suggestive of pneumonia (confidence {:.2}).", score),
                score,
                Region::new(150.0, 200.0, 80.0, 60.0),
                Severity::Medium,
            )?
            .with_measurement("surface_mm2", 1200.0),
            Modality::MG => Finding::new(
                "microcalcifications",
                format!("Cluster of suspicious microcalcifications (confidence {:.2}).", score),
                score,
                Region::new(180.0, 220.0, 15.0, 15.0),
                if score > 0.9 { Severity::High } else { Severity::Medium },
            )?
            .with_measurement("count", 8.0)
            .with_measurement("cluster_size_mm", 12.0),
        };

        Ok(Some(finding))
    }
}

#[async_trait]
impl<S: AnomalyScorer> Analyzer for ModalityRuleAnalyzer<S> {
    fn version(&self) -> &str {
        &self.version
    }

    async fn analyze(&self, input: &AnalysisInput) -> Result<Option<AnalyzerOutput>, AnalyzerError> {
        let score = self.scorer.score(input).await?;
        tracing::debug!(
            object_id = %input.object_id,
            scorer = self.scorer.name(),
            score,
            "anomaly score computed"
        );

        let findings = self.finding_for(input.modality, score)?.into_iter().collect();
        Ok(Some(AnalyzerOutput { findings }))
    }
}
