//! leaseholdd — task-leasing exchange daemon.

use std::time::Duration;

use anyhow::Result;

use leasehold_core::config::LeaseholdConfig;
use leasehold_services::{expiry, ExchangeService};

const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = LeaseholdConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = LeaseholdConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        LeaseholdConfig::default()
    });
    tracing::info!(
        config = %LeaseholdConfig::file_path().display(),
        ttl_secs = config.lease.ttl_secs,
        refresh_on_access = config.lease.refresh_on_access,
        message_auth = ?config.messages.auth,
        "leaseholdd starting"
    );

    let service = ExchangeService::new(&config);

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let expiry_task = tokio::spawn(expiry::expiry_loop(
        service.clone(),
        config.lease.sweep_interval(),
    ));

    let snapshot_task = tokio::spawn(expiry::snapshot_loop(service.clone(), SNAPSHOT_INTERVAL));

    let api_task = {
        let state = leasehold_api::ApiState {
            service: service.clone(),
            shutdown_tx: shutdown_tx.clone(),
        };
        let bind_addr = config.network.bind_addr.clone();
        let port = config.network.api_port;
        tokio::spawn(async move {
            if let Err(e) = leasehold_api::serve(state, &bind_addr, port).await {
                tracing::error!(error = %e, "API server failed");
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = expiry_task        => tracing::error!("expiry task exited: {:?}", r),
        r = snapshot_task      => tracing::error!("snapshot task exited: {:?}", r),
        r = api_task           => tracing::error!("API server exited: {:?}", r),
    }

    let status = service.status();
    tracing::info!(
        runs = status.runs,
        leases = status.leases.len(),
        issued = status.stats.issued,
        retired = status.stats.retired,
        expired = status.stats.expired,
        "final lease table"
    );
    Ok(())
}
