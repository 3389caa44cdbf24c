//! Accepts worker results and retires the lease they were produced under.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;

use leasehold_core::wire::now_ms;
use leasehold_core::{Context, ExchangeError, OutcomeStatus, RunId, Token};

use crate::inputs_store::InputsStore;
use crate::lease::LeaseManager;
use crate::pending::PendingRegistry;
use crate::run_store::RunProvider;

/// One accepted outputs submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputsRecord {
    pub context: Context,
    /// Fingerprint of the lease that produced it.
    pub lease: String,
    /// Unix ms.
    pub received_at: u64,
    /// False when a newer round was scheduled while the lease was out; the
    /// run's context was left alone.
    pub current: bool,
}

#[derive(Clone)]
pub struct OutputsSink {
    leases: LeaseManager,
    runs: Arc<dyn RunProvider>,
    pending: PendingRegistry,
    inputs: InputsStore,
    /// run_id → accepted outputs, oldest first
    history: Arc<DashMap<RunId, Vec<OutputsRecord>>>,
}

impl OutputsSink {
    pub fn new(
        leases: LeaseManager,
        runs: Arc<dyn RunProvider>,
        pending: PendingRegistry,
        inputs: InputsStore,
    ) -> Self {
        Self {
            leases,
            runs,
            pending,
            inputs,
            history: Arc::new(DashMap::new()),
        }
    }

    /// Record `context` as the result of the lease behind `token`.
    ///
    /// Protocol-level failures (unknown or retired token, wrong run) come back
    /// as `Err`. A lease that ran out is answered with `DEADLINE_EXCEEDED` and
    /// its result is discarded.
    ///
    /// Accepted outputs always enter the history. They become the run's
    /// context, and settle its pending inputs, only if the bundle this lease
    /// delivered is still the one pending. A round scheduled mid-lease stays
    /// pending for the next worker.
    pub fn push(&self, token: &Token, context: Context) -> Result<OutcomeStatus, ExchangeError> {
        let run_id = context.run_id;

        // checked first so a mismatched context leaves the lease intact
        match self.leases.validate(token, run_id) {
            Ok(_) => {}
            Err(ExchangeError::Expired) => return Ok(self.deadline_exceeded(token, run_id)),
            Err(e) => return Err(e),
        }
        let lease = match self.leases.consume(token) {
            Ok(lease) => lease,
            Err(ExchangeError::Expired) => return Ok(self.deadline_exceeded(token, run_id)),
            Err(e) => return Err(e),
        };
        let delivered = self.inputs.release(&lease.digest);

        let settled = self
            .pending
            .settle_inputs(run_id, delivered, || self.runs.store_context(context.clone()));
        let current = match settled {
            Ok(current) => current,
            Err(e) => {
                tracing::warn!(run_id, lease = %lease.id(), error = %e, "outputs could not be recorded");
                return Ok(OutcomeStatus::unknown_error(e.to_string()));
            }
        };
        self.history.entry(run_id).or_default().push(OutputsRecord {
            context,
            lease: lease.id(),
            received_at: now_ms(),
            current,
        });

        if current {
            tracing::info!(run_id, lease = %lease.id(), "outputs recorded");
        } else {
            tracing::info!(
                run_id,
                lease = %lease.id(),
                "outputs recorded, newer inputs stay pending"
            );
        }
        Ok(OutcomeStatus::success())
    }

    pub fn history(&self, run_id: RunId) -> Vec<OutputsRecord> {
        self.history
            .get(&run_id)
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    pub fn discard(&self, run_id: RunId) {
        self.history.remove(&run_id);
    }

    fn deadline_exceeded(&self, token: &Token, run_id: RunId) -> OutcomeStatus {
        self.inputs.release(&token.digest());
        tracing::warn!(
            run_id,
            lease = %token.fingerprint(),
            "outputs arrived after lease deadline, discarded"
        );
        OutcomeStatus::deadline_exceeded()
    }
}
