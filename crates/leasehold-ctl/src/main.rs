//! leasehold-ctl — command-line interface for the leasehold daemon.

mod cmd;

use anyhow::{Context, Result};

use leasehold_core::RunId;
use libleasehold::DEFAULT_PORT;

fn print_usage() {
    println!("Usage: leasehold-ctl [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  status                                  Show leases, pending runs and queues");
    println!("  shutdown                                Stop the daemon");
    println!();
    println!("  runs add <fab_id> <version> <fab_file> [--run-id <id>] [--context <json>]");
    println!("  runs context <run_id> <json>            Schedule the next round's inputs");
    println!("  runs send <run_id> <json> [--type <t>]  Queue a message for the run's worker");
    println!("  runs inbox <run_id>                     Drain messages the worker sent");
    println!("  runs outputs <run_id>                   Show accepted outputs");
    println!("  runs rm <run_id>                        Discard a run");
    println!();
    println!("  pending                                 Runs a worker could lease now");
    println!("  token <run_id>                          Request a lease token");
    println!("  inputs <token>                          Pull the lease's input bundle");
    println!("  outputs <token> <run_id> <json>         Push a result context");
    println!("  pull-message <token>                    Pull the next message");
    println!("  push-message <token> <run_id> <json>    Send a message to the server");
    println!();
    println!("  worker [--once] [--poll-ms <ms>]        Run the built-in echo worker");
    println!();
    println!("Options:");
    println!("  --port <port>   API port (default: {})", DEFAULT_PORT);
}

fn parse_run_id(raw: &str) -> Result<RunId> {
    raw.parse().with_context(|| format!("invalid run id: {}", raw))
}

/// Remove `--name <value>` from `args`, returning the value.
fn take_option(args: &mut Vec<String>, name: &str) -> Result<Option<String>> {
    let Some(pos) = args.iter().position(|a| a == name) else {
        return Ok(None);
    };
    if pos + 1 >= args.len() {
        anyhow::bail!("{} requires a value", name);
    }
    let value = args.remove(pos + 1);
    args.remove(pos);
    Ok(Some(value))
}

fn take_flag(args: &mut Vec<String>, name: &str) -> bool {
    match args.iter().position(|a| a == name) {
        Some(pos) => {
            args.remove(pos);
            true
        }
        None => false,
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();

    let port = match take_option(&mut args, "--port")? {
        Some(p) => p.parse().context("--port must be a number")?,
        None => DEFAULT_PORT,
    };
    let run_id = take_option(&mut args, "--run-id")?
        .map(|r| parse_run_id(&r))
        .transpose()?;
    let context = take_option(&mut args, "--context")?;
    let message_type = take_option(&mut args, "--type")?;
    let poll_ms = match take_option(&mut args, "--poll-ms")? {
        Some(ms) => ms.parse().context("--poll-ms must be a number")?,
        None => 1_000,
    };
    let once = take_flag(&mut args, "--once");

    let remaining: Vec<&str> = args.iter().map(String::as_str).collect();

    match remaining.as_slice() {
        ["status"] | []                       => cmd::status::cmd_status(port).await,
        ["shutdown"]                          => cmd::status::cmd_shutdown(port).await,
        ["runs", "add", fab_id, version, fab] => {
            cmd::runs::cmd_runs_add(port, fab_id, version, fab, run_id, context.as_deref()).await
        }
        ["runs", "context", run, json]        => cmd::runs::cmd_runs_context(port, parse_run_id(run)?, json).await,
        ["runs", "send", run, json]           => {
            let message_type = message_type.as_deref().unwrap_or(cmd::runs::DEFAULT_MESSAGE_TYPE);
            cmd::runs::cmd_runs_send(port, parse_run_id(run)?, message_type, json).await
        }
        ["runs", "inbox", run]                => cmd::runs::cmd_runs_inbox(port, parse_run_id(run)?).await,
        ["runs", "outputs", run]              => cmd::runs::cmd_runs_outputs(port, parse_run_id(run)?).await,
        ["runs", "rm", run]                   => cmd::runs::cmd_runs_rm(port, parse_run_id(run)?).await,
        ["pending"]                           => cmd::appio::cmd_pending(port).await,
        ["token", run]                        => cmd::appio::cmd_token(port, parse_run_id(run)?).await,
        ["inputs", token]                     => cmd::appio::cmd_inputs(port, token).await,
        ["outputs", token, run, json]         => cmd::appio::cmd_outputs(port, token, parse_run_id(run)?, json).await,
        ["pull-message", token]               => cmd::appio::cmd_pull_message(port, token).await,
        ["push-message", token, run, json]    => cmd::appio::cmd_push_message(port, token, parse_run_id(run)?, json).await,
        ["worker"]                            => cmd::worker::cmd_worker(port, once, poll_ms).await,
        ["help"] | ["--help"] | ["-h"]        => { print_usage(); Ok(()) }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
