//! Manual protocol commands: drive one step of the worker exchange by hand.

use anyhow::{Context as _, Result};

use leasehold_core::message::msg_types;
use leasehold_core::wire::SERVER_NODE_ID;
use leasehold_core::{Context, ExchangeApi, Message, RunId, Token};
use libleasehold::ExchangeClient;

pub async fn cmd_pending(port: u16) -> Result<()> {
    let runs = ExchangeClient::local(port)
        .get_run_ids_with_pending_messages()
        .await?;
    if runs.is_empty() {
        println!("No runs with pending work.");
    } else {
        for run_id in runs {
            println!("{}", run_id);
        }
    }
    Ok(())
}

pub async fn cmd_token(port: u16, run_id: RunId) -> Result<()> {
    let token = ExchangeClient::local(port).request_token(run_id).await?;
    println!("{}", token.as_str());
    Ok(())
}

pub async fn cmd_inputs(port: u16, token: &str) -> Result<()> {
    let inputs = ExchangeClient::local(port)
        .pull_client_app_inputs(&Token::from_wire(token))
        .await?;

    println!("═══════════════════════════════════════");
    println!("  Inputs for run {}", inputs.run.run_id);
    println!("═══════════════════════════════════════");
    println!("  fab      : {} {}", inputs.run.fab_id, inputs.run.fab_version);
    println!("  fab hash : {}", inputs.fab.hash_str);
    println!("  fab size : {} bytes", inputs.fab.content.len());
    println!("  context  :");
    println!("{}", serde_json::to_string_pretty(&inputs.context)?);
    Ok(())
}

/// `context` is a JSON object; its `run_id` defaults to `run_id`.
pub async fn cmd_outputs(port: u16, token: &str, run_id: RunId, context: &str) -> Result<()> {
    let mut value: serde_json::Value =
        serde_json::from_str(context).context("context must be JSON")?;
    if let Some(map) = value.as_object_mut() {
        map.entry("run_id").or_insert(run_id.into());
    }
    let context: Context = serde_json::from_value(value).context("invalid context")?;

    let status = ExchangeClient::local(port)
        .push_client_app_outputs(&Token::from_wire(token), context)
        .await?;
    println!("{:?} {}", status.code, status.message);
    Ok(())
}

pub async fn cmd_pull_message(port: u16, token: &str) -> Result<()> {
    let message = ExchangeClient::local(port)
        .pull_message(&Token::from_wire(token))
        .await?;
    println!("{}", serde_json::to_string_pretty(&message)?);
    Ok(())
}

/// Send `content` to the server node under the lease.
pub async fn cmd_push_message(port: u16, token: &str, run_id: RunId, content: &str) -> Result<()> {
    let content: serde_json::Value = serde_json::from_str(content)
        .unwrap_or_else(|_| serde_json::Value::String(content.to_string()));
    let message = Message::new(run_id, 1, SERVER_NODE_ID, msg_types::QUERY, content);
    ExchangeClient::local(port)
        .push_message(&Token::from_wire(token), message)
        .await?;
    println!("Message sent.");
    Ok(())
}
