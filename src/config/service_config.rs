use serde::Deserialize;

/// Identity of this relay instance
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_id")]
    pub id: String,
    /// Default `tracing` filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            id: default_id(),
            log_level: default_log_level(),
        }
    }
}

fn default_id() -> String {
    "pacsai".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
