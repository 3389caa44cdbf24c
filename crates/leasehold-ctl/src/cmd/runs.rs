//! Run administration: register, schedule, message, inspect, discard.

use anyhow::{Context as _, Result};
use serde::Deserialize;

use leasehold_core::message::msg_types;
use leasehold_core::wire::{Ack, DrainResponse, EnqueueResponse, RegisterRunRequest};
use leasehold_core::{Context, Message, Run, RunId};

use super::http::{base_url, delete_json, get_json, post_json_body};

/// Message type used by `runs send` when none is given.
pub const DEFAULT_MESSAGE_TYPE: &str = msg_types::TRAIN;

#[derive(Deserialize)]
struct OutputsResponse {
    run_id: RunId,
    outputs: Vec<OutputsRecord>,
}

#[derive(Deserialize)]
struct OutputsRecord {
    context: Context,
    lease: String,
    received_at: u64,
    #[serde(default)]
    current: bool,
}

fn parse_context(raw: Option<&str>) -> Result<Option<Context>> {
    raw.map(|s| serde_json::from_str::<Context>(s).context("context must be a JSON Context"))
        .transpose()
}

pub async fn cmd_runs_add(
    port: u16,
    fab_id: &str,
    fab_version: &str,
    fab_path: &str,
    run_id: Option<RunId>,
    context: Option<&str>,
) -> Result<()> {
    let fab_content = std::fs::read(fab_path).with_context(|| format!("failed to read {}", fab_path))?;
    let req = RegisterRunRequest {
        run_id,
        fab_id: fab_id.to_string(),
        fab_version: fab_version.to_string(),
        fab_content: fab_content.into(),
        override_config: Default::default(),
        context: parse_context(context)?,
    };
    let run: Run = post_json_body(&format!("{}/admin/runs", base_url(port)), &req).await?;

    println!("Registered run {}", run.run_id);
    println!("  fab      : {} {}", run.fab_id, run.fab_version);
    println!("  fab hash : {}", run.fab_hash);
    if req.context.is_some() {
        println!("  inputs   : pending");
    }
    Ok(())
}

pub async fn cmd_runs_context(port: u16, run_id: RunId, context: &str) -> Result<()> {
    let context = parse_context(Some(context))?.unwrap_or_default();
    let _: Ack = post_json_body(
        &format!("{}/admin/runs/{}/context", base_url(port), run_id),
        &context,
    )
    .await?;
    println!("Inputs scheduled for run {}.", run_id);
    Ok(())
}

pub async fn cmd_runs_send(port: u16, run_id: RunId, message_type: &str, content: &str) -> Result<()> {
    let content: serde_json::Value = serde_json::from_str(content)
        .unwrap_or_else(|_| serde_json::Value::String(content.to_string()));
    let message = Message::new(run_id, 0, 1, message_type, content);
    let resp: EnqueueResponse = post_json_body(
        &format!("{}/admin/runs/{}/messages", base_url(port), run_id),
        &message,
    )
    .await?;
    println!("Queued {}", resp.message_id);
    Ok(())
}

pub async fn cmd_runs_inbox(port: u16, run_id: RunId) -> Result<()> {
    let resp: DrainResponse =
        get_json(&format!("{}/admin/runs/{}/messages", base_url(port), run_id)).await?;

    if resp.messages.is_empty() {
        println!("No messages from run {}.", run_id);
        return Ok(());
    }
    for m in &resp.messages {
        let id = &m.metadata.message_id;
        println!("  ┌─ {} [{}]", m.metadata.message_type, m.metadata.created_at);
        println!("  │  id   : {}...", &id[..16.min(id.len())]);
        println!("  │  from : node {}", m.metadata.src_node_id);
        println!("  └─ body : {}", m.content);
    }
    Ok(())
}

pub async fn cmd_runs_outputs(port: u16, run_id: RunId) -> Result<()> {
    let resp: OutputsResponse =
        get_json(&format!("{}/admin/runs/{}/outputs", base_url(port), run_id)).await?;

    println!("═══════════════════════════════════════");
    println!("  Outputs for run {} ({})", resp.run_id, resp.outputs.len());
    println!("═══════════════════════════════════════");
    for (i, o) in resp.outputs.iter().enumerate() {
        let tag = if o.current { "" } else { " (superseded)" };
        println!("  ┌─ #{} lease {} at {}{}", i + 1, o.lease, o.received_at, tag);
        println!("  └─ state : {}", o.context.state);
    }
    Ok(())
}

pub async fn cmd_runs_rm(port: u16, run_id: RunId) -> Result<()> {
    let _: Ack = delete_json(&format!("{}/admin/runs/{}", base_url(port), run_id)).await?;
    println!("Run {} discarded.", run_id);
    Ok(())
}
