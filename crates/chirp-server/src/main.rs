use anyhow::{anyhow, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod config;
mod telemetry;

use config::ServerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::parse();

    telemetry::init().map_err(|e| anyhow!("Failed to initialize telemetry: {}", e))?;

    info!("Chirp Server starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    config.log_config();

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown signal received");
                    shutdown.cancel();
                }
                Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
            }
        });
    }

    chirp_xmpp::start(config.into_xmpp_config(), shutdown).await?;

    info!("Chirp Server stopped");
    Ok(())
}
