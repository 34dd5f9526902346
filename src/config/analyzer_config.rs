use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzerConfig {
    /// Scores at or below this produce no finding
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_model_version")]
    pub model_version: String,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            model_version: default_model_version(),
        }
    }
}

fn default_confidence_threshold() -> f64 {
    0.8
}

fn default_model_version() -> String {
    "modality-rules-1.0".to_string()
}
