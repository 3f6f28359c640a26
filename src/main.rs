//! taskpulse - HTTP Server Entry Point
//!
//! Starts the relay that collects progress events and pushes them to
//! dashboard observers.

use taskpulse::{api, config::Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskpulse=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: cleanup_interval={}s retention={}s stale={}s max_age={}s persistence={}",
        config.cleanup_interval,
        config.retention_seconds,
        config.stale_seconds,
        config.max_task_age,
        config
            .storage_path
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(disabled)".to_string()),
    );

    // Start HTTP server
    api::serve(config).await?;

    Ok(())
}
