//! # Confab Server
//!
//! Real-time direct-message relay server with a decoupled history API.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! confab
//!
//! # Run with environment variables
//! CONFAB_PORT=9000 CONFAB_HOST=0.0.0.0 confab
//! ```
//!
//! Configuration is read from `confab.toml` if present; see [`config`].

mod api;
mod config;
mod metrics;
mod relay;
mod store;

use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "confab=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!(
        "Starting Confab server on {}:{}",
        config.host,
        config.port
    );

    // Initialize metrics
    metrics::init_metrics();
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            tracing::error!("Failed to start metrics server: {}", e);
        }
    }

    let state = Arc::new(relay::AppState::new(&config)?);

    // History API runs beside the relay endpoint
    let api_state = state.clone();
    let api_config = config.clone();
    tokio::spawn(async move {
        if let Err(e) = api::run_api_server(api_config, api_state).await {
            tracing::error!("History API server failed: {}", e);
        }
    });

    // Relay accept loop
    relay::run_relay_server(config, state).await?;

    Ok(())
}
