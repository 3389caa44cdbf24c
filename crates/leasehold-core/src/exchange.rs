//! The six app-IO operations as a trait.
//!
//! Implemented in-process by the server's `ExchangeService` and over HTTP by
//! the worker client, so worker logic is written once against this seam.

use std::future::Future;

use crate::crypto::Token;
use crate::error::ExchangeError;
use crate::message::Message;
use crate::wire::{ClientAppInputs, Context, OutcomeStatus, RunId};

pub type ExchangeResult<T> = Result<T, ExchangeError>;

pub trait ExchangeApi: Send + Sync {
    /// Runs with undelivered inputs or queued messages and no active lease.
    fn get_run_ids_with_pending_messages(
        &self,
    ) -> impl Future<Output = ExchangeResult<Vec<RunId>>> + Send;

    /// Lease `run_id`. Fails with `LeaseConflict` while another lease is live.
    fn request_token(&self, run_id: RunId) -> impl Future<Output = ExchangeResult<Token>> + Send;

    /// Fetch the lease's input bundle. Idempotent within one lease.
    fn pull_client_app_inputs(
        &self,
        token: &Token,
    ) -> impl Future<Output = ExchangeResult<ClientAppInputs>> + Send;

    /// Submit the result context. Retires the lease on success.
    fn push_client_app_outputs(
        &self,
        token: &Token,
        context: Context,
    ) -> impl Future<Output = ExchangeResult<OutcomeStatus>> + Send;

    /// Dequeue the next worker-bound message. `NoPendingMessage` when empty.
    fn pull_message(&self, token: &Token) -> impl Future<Output = ExchangeResult<Message>> + Send;

    /// Enqueue a message under the lease.
    fn push_message(
        &self,
        token: &Token,
        message: Message,
    ) -> impl Future<Output = ExchangeResult<()>> + Send;
}
