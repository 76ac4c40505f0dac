use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use academy_notifier::config::Config;
use academy_notifier::gateway::EvolutionClient;
use academy_notifier::notifier::Notifier;
use academy_notifier::server::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,academy_notifier=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    if config.server.admin_token.is_empty() {
        anyhow::bail!("server.admin_token is empty (set it in the config or NOTIFIER_ADMIN_TOKEN)");
    }

    info!("Configuration loaded successfully");
    info!("  Gateway: {}", config.gateway.api_root());
    info!("  Instance: {}", config.gateway.instance_name);
    info!("  Default country code: {}", config.phone.default_country_code);
    info!("  Bulk delay: {:?}", config.dispatch.bulk_delay());

    let gateway = EvolutionClient::new(config.gateway.clone())
        .context("Failed to build gateway HTTP client")?;
    let notifier = Arc::new(Notifier::new(Arc::new(gateway), &config));

    let state = AppState {
        notifier,
        admin_token: Arc::from(config.server.admin_token.as_str()),
    };
    let app = server::build_app(
        state,
        Duration::from_secs(config.server.request_timeout_secs),
    );

    let listener = tokio::net::TcpListener::bind(config.server.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.server.bind))?;

    info!("Admin API listening on http://{}", config.server.bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("Server error")?;

    Ok(())
}
