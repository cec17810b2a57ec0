//! vqdiagd - Video Quality Diagnosis daemon
//!
//! Boots the component graph and runs the scheduler until ctrl-c. Live
//! ingest and video decoding are left unwired here; integrations install
//! their own `StreamConnector`/`VideoSourceFactory` when embedding the
//! library.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vqdiag::diagnosis_service::NoVideoDecoder;
use vqdiag::media::UnwiredStreamConnector;
use vqdiag::{AppConfig, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vqdiag=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting vqdiagd v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::default();
    tracing::info!(
        storage_root = %config.storage_root.display(),
        parallel_detection = config.parallel_detection,
        max_workers = config.max_workers,
        "Configuration loaded"
    );

    let state = AppState::build(
        config,
        Arc::new(UnwiredStreamConnector),
        Arc::new(NoVideoDecoder),
    )
    .await?;
    tracing::info!(
        detectors = state.registry.len(),
        "Diagnosis core initialized"
    );

    state.scheduler.start().await;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    state.scheduler.stop().await;
    state.streams.stop_all().await;
    state
        .profiles
        .save(&state.config.storage_root.join("profiles.yaml"))
        .await?;
    tracing::info!("Shutdown complete");

    Ok(())
}
