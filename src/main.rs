//! skyrelay worker.
//!
//! Loads the roster once, subscribes to Jetstream for those authors and
//! forwards every new post to the workflow-trigger endpoint.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `API_BASE_URL`: Control API base URL (required)
//! - `ADMIN_API_KEY`: Bearer credential for the control API
//! - `JETSTREAM_URL`: Stream endpoint (default: Jetstream us-west)
//! - `SKYRELAY_CONFIG`: Optional TOML file (default: `config/skyrelay.toml`)
//! - `RUST_LOG`: Logging level (default: "info")

use skyrelay::config::RelayConfig;
use skyrelay::control_api::ControlApi;
use skyrelay::dispatcher::Dispatcher;
use skyrelay::forwarder::TriggerForwarder;
use skyrelay::roster::RosterStore;
use skyrelay::shutdown::ShutdownSignal;
use skyrelay::stream::{ConnectionManager, WebSocketTransport};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Worker process starting");

    let config = match RelayConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "FATAL: invalid configuration");
            std::process::exit(1);
        }
    };

    let api: Arc<dyn ControlApi> = Arc::new(config.control_api_client());

    let roster = Arc::new(RosterStore::new());
    let keys = roster
        .load(api.as_ref(), &config.control_api.platform, config.fetch_timeout())
        .await;

    let forwarder = Arc::new(TriggerForwarder::new(api));
    let dispatcher = Arc::new(Dispatcher::new(
        roster,
        forwarder,
        config.stream.collection.as_str(),
    ));

    let mut manager = ConnectionManager::new(
        &config.stream.url,
        &keys,
        Arc::new(WebSocketTransport::new()),
        dispatcher,
    )?
    .with_policy(config.backoff_policy());

    let shutdown = ShutdownSignal::new();
    let listener = shutdown.clone();
    tokio::spawn(async move { listener.listen().await });

    manager.run_until(&shutdown).await;

    info!("Worker process shutting down");
    Ok(())
}
