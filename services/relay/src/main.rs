use anyhow::{Context, Result};
use codipop_relay::{
    start_api_server, AppState, Config, FieldNames, FirestoreWardrobe, GcsArtifactStore,
    GeminiClient,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting CodiPOP relay"
    );

    // Initialize metrics
    if config.service.metrics_enabled {
        init_metrics(config.service.metrics_port)?;
    }

    // Initialize adapters
    let model = Arc::new(
        GeminiClient::new(&config.gemini).context("Failed to initialize Gemini client")?,
    );

    let artifacts = Arc::new(
        GcsArtifactStore::new(&config.storage)
            .await
            .context("Failed to initialize artifact store")?,
    );

    let wardrobe = Arc::new(
        FirestoreWardrobe::new(&config.firestore)
            .context("Failed to initialize Firestore wardrobe")?,
    );

    let state = AppState {
        model,
        artifacts,
        wardrobe,
        field_names: FieldNames::default(),
        recent_item_limit: config.firestore.recent_item_limit,
    };

    start_api_server(state, &config.api, shutdown_signal()).await?;

    info!("Relay stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }

    info!("Shutting down relay, draining in-flight requests");
}
