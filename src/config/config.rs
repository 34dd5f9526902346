use dimse::{DimseConfig, RemoteNode};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::config::{AnalyzerConfig, LoggingConfig, PipelineConfig, ServiceConfig};
use crate::state::StateConfig;
use crate::storage::StorageConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("service.id must not be empty")]
    InvalidServiceId,

    #[error("invalid [{section}] settings: {reason}")]
    InvalidSection {
        section: &'static str,
        reason: String,
    },
}

impl ConfigError {
    fn section(section: &'static str, reason: impl ToString) -> Self {
        ConfigError::InvalidSection {
            section,
            reason: reason.to_string(),
        }
    }
}

/// Complete relay configuration, one field per TOML section
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub dimse: DimseConfig,
    #[serde(default = "default_destination")]
    pub destination: RemoteNode,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            logging: LoggingConfig::default(),
            dimse: DimseConfig::default(),
            destination: default_destination(),
            pipeline: PipelineConfig::default(),
            storage: StorageConfig::default(),
            state: StateConfig::default(),
            analyzer: AnalyzerConfig::default(),
        }
    }
}

/// The archive reports are sent to when no `[destination]` is given
fn default_destination() -> RemoteNode {
    RemoteNode::new("PACS_INTERNE", "localhost", 11111)
}

impl Config {
    /// Load and validate a TOML configuration file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.id.trim().is_empty() {
            return Err(ConfigError::InvalidServiceId);
        }

        self.dimse
            .validate()
            .map_err(|e| ConfigError::section("dimse", e))?;
        self.destination
            .validate()
            .map_err(|e| ConfigError::section("destination", e))?;

        if self.pipeline.max_concurrent_analyses == 0 {
            return Err(ConfigError::section(
                "pipeline",
                "max_concurrent_analyses must be greater than 0",
            ));
        }

        self.storage
            .validate()
            .map_err(|e| ConfigError::section("storage", e))?;
        self.state
            .validate()
            .map_err(|e| ConfigError::section("state", e))?;

        let threshold = self.analyzer.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::section(
                "analyzer",
                format!("confidence_threshold {} is outside [0.0, 1.0]", threshold),
            ));
        }
        if self.analyzer.model_version.trim().is_empty() {
            return Err(ConfigError::section("analyzer", "model_version must not be empty"));
        }

        Ok(())
    }
}
