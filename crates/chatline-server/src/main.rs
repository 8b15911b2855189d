//! # Chatline Server
//!
//! Realtime chat, presence and call signaling server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! chatline
//!
//! # Run with a config file
//! CHATLINE_CONFIG=/path/to/chatline.toml chatline
//!
//! # Override single keys from the environment
//! CHATLINE_PORT=8080 CHATLINE_CALLS__RING_TIMEOUT_MS=20000 chatline
//! ```

use anyhow::{Context, Result};
use chatline_server::{config::Config, metrics, run_server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatline_server=debug,chatline_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load configuration")?;

    tracing::info!("Starting Chatline server on {}:{}", config.host, config.port);

    metrics::init_metrics();

    run_server(config).await?;

    Ok(())
}
