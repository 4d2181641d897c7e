use std::sync::Arc;

use anyhow::{Context, Result};
use facegate_core::Threshold;
use facegate_store::{SqliteStore, StoreConfig};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;

use config::Config;
use dbus_interface::{FaceGateService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facegated starting");

    let config = Config::from_env();
    let threshold = Threshold::new(config.match_threshold)
        .context("FACEGATE_MATCH_THRESHOLD must be finite and non-negative")?;

    let store = SqliteStore::open(StoreConfig {
        read_connections: config.read_connections,
        dimension: config.signature_dim,
        key_passphrase: config.store_key.clone(),
        ..StoreConfig::new(&config.db_path)
    })
    .await
    .with_context(|| format!("failed to open store at {}", config.db_path.display()))?;

    let service = FaceGateService::new(
        Arc::new(store),
        Arc::new(config.extractor.build()),
        threshold,
        config.extractor.timeout(),
    );

    let builder = if config.session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(
        bus = if config.session_bus { "session" } else { "system" },
        name = BUS_NAME,
        threshold = threshold.value(),
        extractor = %config.extractor.program.display(),
        "facegated ready"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("facegated shutting down");

    Ok(())
}
