//! Background reclamation and lease-table logging.

use std::time::Duration;

use crate::exchange::ExchangeService;

/// Sweep expired leases, bundles and messages every `interval`. Never returns.
pub async fn expiry_loop(service: ExchangeService, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let report = service.sweep_expired();
        if !report.is_empty() {
            tracing::debug!(
                expired_leases = report.expired_leases,
                released_inputs = report.released_inputs,
                purged_messages = report.purged_messages,
                "expiry sweep"
            );
        }
    }
}

/// Log the lease table every `interval`.
pub async fn snapshot_loop(service: ExchangeService, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let status = service.status();
        tracing::info!(
            runs = status.runs,
            leases = status.leases.len(),
            pending = status.pending_runs.len(),
            issued = status.stats.issued,
            expired = status.stats.expired,
            "lease table snapshot"
        );
        for lease in &status.leases {
            tracing::info!(
                run_id = lease.run_id,
                lease = %lease.lease,
                state = ?lease.state,
                remaining_ms = lease.remaining_ms,
                "  lease"
            );
        }
    }
}
