//! Dantherm ventilation service binary

use anyhow::Context;
use clap::Parser;
use tracing::info;

use dantherm::bootstrap::{self, Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = bootstrap::load_configuration(&args).context("loading configuration")?;

    if args.validate {
        println!(
            "Configuration valid: {} at {} (scan every {}s)",
            config.name,
            config.endpoint(),
            config.scan_interval
        );
        return Ok(());
    }

    bootstrap::initialize_logging(&config).context("initializing logging")?;
    info!("Starting {} v{}", bootstrap::SERVICE_NAME, env!("CARGO_PKG_VERSION"));

    bootstrap::run_service(config)
        .await
        .context("running service")?;
    info!("Service stopped");
    Ok(())
}
