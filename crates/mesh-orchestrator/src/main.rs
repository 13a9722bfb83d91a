//! Meshguard Daemon - Main Entry Point

use mesh_common::MeshConfig;
use mesh_health::TcpHealthProbe;
use mesh_orchestrator::Orchestrator;
use mesh_peering::TcpPeerTransport;
use mesh_remediation::{LogNotifier, ShellExecutor};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Meshguard v{}", env!("CARGO_PKG_VERSION"));

    // Load config
    let config_path =
        std::env::var("MESHGUARD_CONFIG").unwrap_or_else(|_| "/etc/meshguard/config.json".into());

    let config = MeshConfig::load(&config_path).unwrap_or_else(|_| {
        tracing::warn!("Config not found, using defaults");
        MeshConfig::default()
    });

    let orchestrator = Orchestrator::new(
        config,
        Arc::new(TcpPeerTransport),
        Arc::new(TcpHealthProbe),
        Arc::new(ShellExecutor),
        vec![Arc::new(LogNotifier)],
    );
    orchestrator.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    orchestrator.stop().await;

    Ok(())
}
