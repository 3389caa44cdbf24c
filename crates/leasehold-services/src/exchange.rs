//! ExchangeService — wires the registry, lease table, input/output stores and
//! message channel together and exposes the six protocol operations plus the
//! server-side admin surface.

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use leasehold_core::config::{LeaseholdConfig, MessageAuth};
use leasehold_core::wire::{RegisterRunRequest, SERVER_NODE_ID};
use leasehold_core::{
    ClientAppInputs, Context, ExchangeApi, ExchangeError, ExchangeResult, Fab, Message,
    OutcomeStatus, Run, RunId, Token,
};

use crate::inputs_store::InputsStore;
use crate::lease::{LeaseManager, LeaseState, LeaseStats};
use crate::message_channel::{MessageChannel, QueueDepth};
use crate::outputs_sink::{OutputsRecord, OutputsSink};
use crate::pending::PendingRegistry;
use crate::run_store::{RunProvider, RunStore};

// ── Status views ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct LeaseView {
    pub run_id: RunId,
    pub lease: String,
    pub state: LeaseState,
    pub age_ms: u64,
    pub remaining_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueView {
    pub run_id: RunId,
    #[serde(flatten)]
    pub depth: QueueDepth,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExchangeStatus {
    pub runs: usize,
    pub pending_runs: Vec<RunId>,
    pub leases: Vec<LeaseView>,
    pub queues: Vec<QueueView>,
    pub stats: LeaseStats,
    pub cached_inputs: usize,
    pub dropped_messages: u64,
    pub message_auth: MessageAuth,
}

/// What one sweep reclaimed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired_leases: usize,
    pub released_inputs: usize,
    pub purged_messages: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired_leases == 0 && self.released_inputs == 0 && self.purged_messages == 0
    }
}

// ── Service ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ExchangeService {
    runs: RunStore,
    pending: PendingRegistry,
    leases: LeaseManager,
    inputs: InputsStore,
    outputs: OutputsSink,
    channel: MessageChannel,
    message_auth: MessageAuth,
}

impl ExchangeService {
    pub fn new(config: &LeaseholdConfig) -> Self {
        Self::with_store(config, RunStore::new())
    }

    pub fn with_store(config: &LeaseholdConfig, runs: RunStore) -> Self {
        let provider: Arc<dyn RunProvider> = Arc::new(runs.clone());
        let pending = PendingRegistry::new();
        let leases = LeaseManager::new(&config.lease);
        let inputs = InputsStore::new(leases.clone(), provider.clone(), pending.clone());
        let outputs = OutputsSink::new(leases.clone(), provider, pending.clone(), inputs.clone());
        let channel = MessageChannel::new(&config.messages, pending.clone());

        Self {
            runs,
            pending,
            leases,
            inputs,
            outputs,
            channel,
            message_auth: config.messages.auth,
        }
    }

    pub fn leases(&self) -> &LeaseManager {
        &self.leases
    }

    pub fn runs(&self) -> &RunStore {
        &self.runs
    }

    // ── Protocol ──────────────────────────────────────────────────────────────

    /// Runs with outstanding work and no active lease, ascending.
    pub fn pending_runs(&self) -> Vec<RunId> {
        let mut runs: Vec<RunId> = self
            .pending
            .list()
            .into_iter()
            .filter(|run_id| !self.leases.has_active_lease(*run_id))
            .collect();
        runs.sort_unstable();
        runs
    }

    pub fn issue_token(&self, run_id: RunId) -> ExchangeResult<Token> {
        if !self.runs.contains(run_id) {
            return Err(ExchangeError::UnknownRun(run_id));
        }
        self.leases.request_token(run_id).map(|(token, _)| token)
    }

    pub fn pull_inputs(&self, token: &Token) -> ExchangeResult<Arc<ClientAppInputs>> {
        self.inputs.pull(token)
    }

    pub fn push_outputs(&self, token: &Token, context: Context) -> ExchangeResult<OutcomeStatus> {
        self.outputs.push(token, context)
    }

    pub fn next_message(&self, token: &Token) -> ExchangeResult<Message> {
        let run_id = self.authorize_messages(token, None)?;
        self.channel.pull(run_id)
    }

    /// Accept a worker's message. Returns the assigned message id.
    pub fn accept_message(&self, token: &Token, message: Message) -> ExchangeResult<String> {
        self.authorize_messages(token, Some(message.run_id()))?;
        self.channel.push(message)
    }

    // ── Admin ─────────────────────────────────────────────────────────────────

    pub fn register_run(&self, req: RegisterRunRequest) -> ExchangeResult<Run> {
        let fab = Fab::new(req.fab_content);
        let fab_hash = self.runs.insert_fab(fab);

        let run = Run {
            run_id: req.run_id.unwrap_or_else(|| self.fresh_run_id()),
            fab_id: req.fab_id,
            fab_version: req.fab_version,
            fab_hash,
            override_config: req.override_config,
            created_at: 0,
        };
        let run = self.runs.insert_run(run)?;
        tracing::info!(
            run_id = run.run_id,
            fab_id = %run.fab_id,
            fab_version = %run.fab_version,
            "run registered"
        );

        if let Some(context) = req.context {
            self.submit_context(run.run_id, context)?;
        }
        Ok(run)
    }

    /// Schedule the next round for `run_id`. The run becomes pending.
    pub fn submit_context(&self, run_id: RunId, mut context: Context) -> ExchangeResult<()> {
        context.run_id = run_id;
        let generation = self
            .pending
            .schedule_inputs(run_id, || self.runs.store_context(context))?;
        tracing::debug!(run_id, generation, "inputs scheduled");
        Ok(())
    }

    /// Queue a server-originated message for the run's worker.
    pub fn enqueue_message(&self, run_id: RunId, mut message: Message) -> ExchangeResult<String> {
        self.require_run(run_id)?;
        message.metadata.run_id = run_id;
        message.metadata.src_node_id = SERVER_NODE_ID;
        self.channel.enqueue_for_worker(message)
    }

    /// Everything the run's worker sent to the server so far.
    pub fn drain_messages(&self, run_id: RunId) -> ExchangeResult<Vec<Message>> {
        self.require_run(run_id)?;
        Ok(self.channel.drain_for_server(run_id))
    }

    pub fn outputs_for(&self, run_id: RunId) -> ExchangeResult<Vec<OutputsRecord>> {
        self.require_run(run_id)?;
        Ok(self.outputs.history(run_id))
    }

    /// Drop a run with its lease, queues, pending entry and history.
    pub fn discard_run(&self, run_id: RunId) -> ExchangeResult<()> {
        if !self.runs.remove_run(run_id) {
            return Err(ExchangeError::UnknownRun(run_id));
        }
        self.leases.release_run(run_id);
        self.inputs.release_run(run_id);
        let dropped = self.channel.discard_run(run_id);
        self.pending.remove(run_id);
        self.outputs.discard(run_id);
        tracing::info!(
            run_id,
            dropped_to_worker = dropped.to_worker,
            dropped_to_server = dropped.to_server,
            "run discarded"
        );
        Ok(())
    }

    pub fn status(&self) -> ExchangeStatus {
        let now = Instant::now();
        let mut leases: Vec<LeaseView> = self
            .leases
            .snapshot()
            .into_iter()
            .map(|l| LeaseView {
                run_id: l.run_id,
                lease: l.id(),
                state: l.state,
                age_ms: now.saturating_duration_since(l.issued_at).as_millis() as u64,
                remaining_ms: l.remaining(now).as_millis() as u64,
            })
            .collect();
        leases.sort_by_key(|l| l.run_id);

        let mut queues: Vec<QueueView> = self
            .channel
            .depths()
            .into_iter()
            .map(|(run_id, depth)| QueueView { run_id, depth })
            .collect();
        queues.sort_by_key(|q| q.run_id);

        ExchangeStatus {
            runs: self.runs.len(),
            pending_runs: self.pending_runs(),
            leases,
            queues,
            stats: self.leases.stats(),
            cached_inputs: self.inputs.cached(),
            dropped_messages: self.channel.dropped_expired(),
            message_auth: self.message_auth,
        }
    }

    /// Reclaim expired leases, their cached bundles and stale messages.
    pub fn sweep_expired(&self) -> SweepReport {
        let expired = self.leases.sweep();
        SweepReport {
            expired_leases: expired.len(),
            released_inputs: self.inputs.prune(),
            purged_messages: self.channel.purge_expired(),
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn authorize_messages(&self, token: &Token, expected: Option<RunId>) -> ExchangeResult<RunId> {
        match self.message_auth {
            MessageAuth::ActiveLease => {
                let lease = match expected {
                    Some(run_id) => self.leases.validate(token, run_id)?,
                    None => self.leases.resolve(token)?,
                };
                Ok(lease.run_id)
            }
            MessageAuth::TokenPossession => self.leases.resolve_possession(token, expected),
        }
    }

    fn require_run(&self, run_id: RunId) -> ExchangeResult<()> {
        if self.runs.contains(run_id) {
            Ok(())
        } else {
            Err(ExchangeError::UnknownRun(run_id))
        }
    }

    fn fresh_run_id(&self) -> RunId {
        loop {
            let candidate = rand::random::<u64>() >> 1;
            if candidate != 0 && !self.runs.contains(candidate) {
                return candidate;
            }
        }
    }
}

impl ExchangeApi for ExchangeService {
    async fn get_run_ids_with_pending_messages(&self) -> ExchangeResult<Vec<RunId>> {
        Ok(self.pending_runs())
    }

    async fn request_token(&self, run_id: RunId) -> ExchangeResult<Token> {
        self.issue_token(run_id)
    }

    async fn pull_client_app_inputs(&self, token: &Token) -> ExchangeResult<ClientAppInputs> {
        self.pull_inputs(token).map(|bundle| (*bundle).clone())
    }

    async fn push_client_app_outputs(
        &self,
        token: &Token,
        context: Context,
    ) -> ExchangeResult<OutcomeStatus> {
        self.push_outputs(token, context)
    }

    async fn pull_message(&self, token: &Token) -> ExchangeResult<Message> {
        self.next_message(token)
    }

    async fn push_message(&self, token: &Token, message: Message) -> ExchangeResult<()> {
        self.accept_message(token, message).map(|_| ())
    }
}
