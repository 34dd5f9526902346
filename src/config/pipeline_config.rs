use serde::Deserialize;
use std::time::Duration;

/// What enqueue does once every analysis slot is taken
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backpressure {
    /// Wait for a slot; the store reply is delayed meanwhile
    #[default]
    Wait,
    /// Refuse the object
    Reject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_max_concurrent_analyses")]
    pub max_concurrent_analyses: usize,
    /// Deadline around each analyzer call; 0 disables it
    #[serde(default = "default_analysis_timeout_ms")]
    pub analysis_timeout_ms: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    #[serde(default)]
    pub backpressure: Backpressure,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_analyses: default_max_concurrent_analyses(),
            analysis_timeout_ms: default_analysis_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            backpressure: Backpressure::default(),
        }
    }
}

impl PipelineConfig {
    pub fn analysis_timeout(&self) -> Option<Duration> {
        (self.analysis_timeout_ms > 0).then(|| Duration::from_millis(self.analysis_timeout_ms))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn default_max_concurrent_analyses() -> usize {
    4
}

fn default_analysis_timeout_ms() -> u64 {
    60_000
}

fn default_shutdown_grace_ms() -> u64 {
    10_000
}
