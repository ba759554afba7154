//! spotmm - MM-aware spot trading engine, entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// MM-aware spot scalping engine.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (also via the SPOTMM_CONFIG env var).
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // TLS provider must be installed before any WS connection.
    spotmm_ws::init_crypto();

    let args = Args::parse();
    spotmm_telemetry::init_logging();

    info!("Starting spotmm v{}", env!("CARGO_PKG_VERSION"));

    // Config precedence: CLI > SPOTMM_CONFIG > default path.
    let config_path = args
        .config
        .or_else(|| std::env::var("SPOTMM_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());
    info!(config_path = %config_path, "Loading configuration");

    let config = spotmm_bot::AppConfig::from_file(&config_path)?;
    info!(
        provider = ?config.active_provider,
        mode = ?config.active_mode,
        "Configuration loaded"
    );

    let app = spotmm_bot::Application::new(config).await?;
    app.run().await?;

    Ok(())
}
