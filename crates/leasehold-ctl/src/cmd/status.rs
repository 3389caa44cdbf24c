//! Daemon status and shutdown commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json, post_json};

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StatusResponse {
    runs: usize,
    pending_runs: Vec<u64>,
    leases: Vec<LeaseInfo>,
    queues: Vec<QueueInfo>,
    stats: LeaseStats,
    cached_inputs: usize,
    dropped_messages: u64,
    message_auth: String,
}

#[derive(Deserialize)]
struct LeaseInfo {
    run_id: u64,
    lease: String,
    state: String,
    age_ms: u64,
    remaining_ms: u64,
}

#[derive(Deserialize)]
struct QueueInfo {
    run_id: u64,
    to_worker: usize,
    to_server: usize,
}

#[derive(Deserialize)]
struct LeaseStats {
    issued: u64,
    retired: u64,
    expired: u64,
    conflicts: u64,
}

#[derive(Deserialize)]
struct ShutdownResponse {
    message: String,
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  Leasehold Daemon Status");
    println!("═══════════════════════════════════════");
    println!("  Runs             : {}", resp.runs);
    println!("  Pending runs     : {}", resp.pending_runs.len());
    println!("  Active leases    : {}", resp.leases.len());
    println!("  Message auth     : {}", resp.message_auth);
    println!("  Cached inputs    : {}", resp.cached_inputs);
    println!("  Dropped messages : {}", resp.dropped_messages);
    println!(
        "  Leases issued/retired/expired/conflicts : {}/{}/{}/{}",
        resp.stats.issued, resp.stats.retired, resp.stats.expired, resp.stats.conflicts
    );

    if resp.leases.is_empty() {
        println!("\n  No active leases.");
    } else {
        println!("\n  Leases:");
        for l in &resp.leases {
            println!("  ┌─ run {}", l.run_id);
            println!("  │  lease     : {}", l.lease);
            println!("  │  state     : {}", l.state);
            println!("  │  age       : {}ms", l.age_ms);
            println!("  └─ remaining : {}ms", l.remaining_ms);
        }
    }

    if !resp.queues.is_empty() {
        println!("\n  Queues:");
        for q in &resp.queues {
            println!(
                "    run {:<20} → worker {:<5} → server {}",
                q.run_id, q.to_worker, q.to_server
            );
        }
    }

    Ok(())
}

pub async fn cmd_shutdown(port: u16) -> Result<()> {
    let resp: ShutdownResponse =
        post_json(&format!("{}/daemon/shutdown", base_url(port))).await?;
    println!("{}", resp.message);
    Ok(())
}
