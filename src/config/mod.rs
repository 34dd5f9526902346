mod analyzer_config;
mod logging_config;
mod pipeline_config;
mod service_config;
pub mod config;

pub use analyzer_config::AnalyzerConfig;
pub use config::{Config, ConfigError};
pub use logging_config::LoggingConfig;
pub use pipeline_config::{Backpressure, PipelineConfig};
pub use service_config::ServiceConfig;
