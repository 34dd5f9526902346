use clap::Parser;
use pacsai::config::Config;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "pacsai", about = "DICOM relay that analyzes received images and forwards SR reports", version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, short, env = "PACSAI_CONFIG", default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_path(&cli.config)?;
    pacsai::logging::init(&config)?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        signal.cancel();
    });

    pacsai::run(config, shutdown).await
}
