//! Worker side of the exchange: discover, lease, pull, compute, push.
//!
//! The loop is written against [`ExchangeApi`], so it runs the same over HTTP
//! and against an in-process service.

use std::time::Duration;

use anyhow::Result;
use serde_json::json;

use leasehold_core::wire::SERVER_NODE_ID;
use leasehold_core::{
    ClientAppInputs, Context, ExchangeApi, ExchangeError, Message, OutcomeCode, RunId, Token,
};

/// The computation a worker performs for each leased run.
pub trait ClientApp: Send + Sync {
    /// Turn an input bundle into the run's next context.
    fn run(&self, inputs: &ClientAppInputs) -> Result<Context>;

    /// React to a server message. `Some` is pushed back as the reply.
    fn on_message(&self, message: &Message) -> Option<Message>;
}

/// Counts completed rounds in the context state and echoes every message
/// back to the server.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoApp;

impl ClientApp for EchoApp {
    fn run(&self, inputs: &ClientAppInputs) -> Result<Context> {
        let mut context = inputs.context.clone();
        let rounds = context
            .state
            .get("rounds_completed")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let mut state = match context.state.take() {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        state.insert("rounds_completed".into(), json!(rounds + 1));
        state.insert("fab_hash".into(), json!(inputs.fab.hash_str));
        context.state = serde_json::Value::Object(state);
        Ok(context)
    }

    fn on_message(&self, message: &Message) -> Option<Message> {
        let mut reply = message.reply(json!({ "echo": message.content }));
        reply.metadata.dst_node_id = SERVER_NODE_ID;
        Some(reply)
    }
}

/// How one pass of the worker ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Nothing was pending.
    NoWork,
    /// Every pending run was leased by someone else first.
    Busy,
    /// Outputs were accepted and the lease retired.
    Completed { run_id: RunId, messages: usize },
    /// The run had messages but no input bundle. The lease is left to expire.
    MessagesOnly { run_id: RunId, messages: usize },
    /// The lease died or the app failed; the run stays pending for a retry.
    Abandoned { run_id: RunId, reason: String },
}

pub struct Worker<E, A> {
    exchange: E,
    app: A,
    poll_interval: Duration,
}

impl<E: ExchangeApi, A: ClientApp> Worker<E, A> {
    pub fn new(exchange: E, app: A) -> Self {
        Self {
            exchange,
            app,
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Poll forever, sleeping between idle passes.
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.run_once().await {
                Ok(AttemptOutcome::NoWork) | Ok(AttemptOutcome::Busy) => {
                    tokio::time::sleep(self.poll_interval).await;
                }
                Ok(outcome) => tracing::info!(?outcome, "attempt finished"),
                Err(e) => {
                    tracing::warn!(error = %e, "attempt failed");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// One discovery pass. Leases the first pending run it can get and works it.
    pub async fn run_once(&self) -> Result<AttemptOutcome> {
        let runs = self.exchange.get_run_ids_with_pending_messages().await?;
        if runs.is_empty() {
            return Ok(AttemptOutcome::NoWork);
        }

        for run_id in runs {
            match self.exchange.request_token(run_id).await {
                Ok(token) => {
                    tracing::debug!(run_id, lease = %token.fingerprint(), "lease acquired");
                    return self.work(run_id, token).await;
                }
                // taken by another worker or discarded since discovery
                Err(ExchangeError::LeaseConflict(_)) | Err(ExchangeError::UnknownRun(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(AttemptOutcome::Busy)
    }

    async fn work(&self, run_id: RunId, token: Token) -> Result<AttemptOutcome> {
        let messages = match self.handle_messages(&token).await {
            Ok(n) => n,
            Err(e) if e.requires_new_token() => return Ok(abandoned(run_id, &e)),
            Err(e) => return Err(e.into()),
        };

        let inputs = match self.exchange.pull_client_app_inputs(&token).await {
            Ok(inputs) => inputs,
            Err(ExchangeError::MissingInputs(..)) => {
                return Ok(AttemptOutcome::MessagesOnly { run_id, messages })
            }
            Err(e) if e.requires_new_token() => return Ok(abandoned(run_id, &e)),
            Err(e) => return Err(e.into()),
        };

        let context = match self.app.run(&inputs) {
            Ok(context) => context,
            Err(e) => {
                return Ok(AttemptOutcome::Abandoned {
                    run_id,
                    reason: format!("app failed: {:#}", e),
                })
            }
        };

        let status = match self.exchange.push_client_app_outputs(&token, context).await {
            Ok(status) => status,
            Err(e) if e.requires_new_token() => return Ok(abandoned(run_id, &e)),
            Err(e) => return Err(e.into()),
        };
        match status.code {
            OutcomeCode::Success => Ok(AttemptOutcome::Completed { run_id, messages }),
            OutcomeCode::DeadlineExceeded | OutcomeCode::UnknownError => {
                Ok(AttemptOutcome::Abandoned {
                    run_id,
                    reason: format!("{:?}: {}", status.code, status.message),
                })
            }
        }
    }

    /// Drain the worker-bound queue, replying where the app wants to.
    async fn handle_messages(&self, token: &Token) -> Result<usize, ExchangeError> {
        let mut handled = 0;
        loop {
            let message = match self.exchange.pull_message(token).await {
                Ok(message) => message,
                Err(ExchangeError::NoPendingMessage(_)) => return Ok(handled),
                Err(e) => return Err(e),
            };
            handled += 1;

            let Some(reply) = self.app.on_message(&message) else {
                continue;
            };
            match self.exchange.push_message(token, reply).await {
                Ok(()) => {}
                Err(ExchangeError::QueueFull(run_id)) => {
                    tracing::warn!(run_id, "reply dropped, server queue full");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn abandoned(run_id: RunId, e: &ExchangeError) -> AttemptOutcome {
    AttemptOutcome::Abandoned {
        run_id,
        reason: e.to_string(),
    }
}
