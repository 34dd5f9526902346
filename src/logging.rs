use crate::config::Config;
use tracing_subscriber::{self, prelude::*, EnvFilter};

/// Install the global `tracing` subscriber
///
/// `RUST_LOG` wins over `service.log_level`. With `logging.log_to_file` set,
/// events go both to stdout and to `logging.log_file_path`.
pub fn init(config: &Config) -> anyhow::Result<()> {
    let filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.service.log_level.as_str()))
    };

    if config.logging.log_to_file {
        let file = std::fs::File::create(&config.logging.log_file_path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to create log file '{}': {}",
                config.logging.log_file_path,
                e
            )
        })?;

        let file_appender = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file));

        let stdout_appender = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(filter())
            .with(file_appender)
            .with(stdout_appender)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
    } else {
        tracing_subscriber::registry()
            .with(filter())
            .with(
                tracing_subscriber::fmt::layer()
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
    }

    Ok(())
}
