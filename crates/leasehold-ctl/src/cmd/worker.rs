//! `worker` — run the built-in echo app against the daemon.

use std::time::Duration;

use anyhow::Result;

use libleasehold::{AttemptOutcome, EchoApp, ExchangeClient, RetryPolicy, RetryingExchange, Worker};

pub async fn cmd_worker(port: u16, once: bool, poll_ms: u64) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let exchange = RetryingExchange::new(ExchangeClient::local(port), RetryPolicy::default());
    let worker = Worker::new(exchange, EchoApp).with_poll_interval(Duration::from_millis(poll_ms));

    if once {
        print_outcome(&worker.run_once().await?);
        return Ok(());
    }

    println!("Worker polling {} every {}ms (ctrl-c to stop)", libleasehold::base_url(port), poll_ms);
    tokio::select! {
        r = worker.run() => r,
        _ = tokio::signal::ctrl_c() => {
            println!("Worker stopped.");
            Ok(())
        }
    }
}

fn print_outcome(outcome: &AttemptOutcome) {
    match outcome {
        AttemptOutcome::NoWork => println!("No pending work."),
        AttemptOutcome::Busy => println!("All pending runs are leased by other workers."),
        AttemptOutcome::Completed { run_id, messages } => {
            println!("Run {} completed ({} messages handled).", run_id, messages)
        }
        AttemptOutcome::MessagesOnly { run_id, messages } => {
            println!("Run {}: {} messages handled, no inputs scheduled.", run_id, messages)
        }
        AttemptOutcome::Abandoned { run_id, reason } => {
            println!("Run {} abandoned: {}", run_id, reason)
        }
    }
}
