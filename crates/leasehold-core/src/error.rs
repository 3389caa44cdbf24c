//! Protocol error taxonomy, shared by the server and the worker client.
//!
//! Every variant has a stable wire `code`. The server renders errors as an
//! [`ErrorBody`]; the client turns the body back into the same variant.

use thiserror::Error;

use crate::wire::{ErrorBody, RunId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    /// The run already holds an active, unexpired lease.
    #[error("run {0} already holds an active lease")]
    LeaseConflict(RunId),
    /// Token is unknown, retired, or was superseded by a newer lease.
    #[error("token is unknown or no longer valid")]
    InvalidToken,
    /// The lease deadline passed before the call arrived.
    #[error("lease deadline has passed")]
    Expired,
    /// Token is valid, but for a different run than the one addressed.
    #[error("token is not bound to run {0}")]
    RunMismatch(RunId),
    /// Nothing queued for this run right now. Callers poll.
    #[error("no pending message for run {0}")]
    NoPendingMessage(RunId),
    #[error("unknown run {0}")]
    UnknownRun(RunId),
    /// The run exists but lacks a context or fab to deliver.
    #[error("inputs for run {0} are incomplete: {1}")]
    MissingInputs(RunId, String),
    #[error("message queue for run {0} is full")]
    QueueFull(RunId),
    /// The request never produced a protocol answer.
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ExchangeError {
    /// Stable wire code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::LeaseConflict(_) => "lease_conflict",
            Self::InvalidToken => "invalid_token",
            Self::Expired => "expired",
            Self::RunMismatch(_) => "run_mismatch",
            Self::NoPendingMessage(_) => "no_pending_message",
            Self::UnknownRun(_) => "unknown_run",
            Self::MissingInputs(..) => "missing_inputs",
            Self::QueueFull(_) => "queue_full",
            Self::Transport(_) => "transport",
            Self::Internal(_) => "internal",
        }
    }

    pub fn run_id(&self) -> Option<RunId> {
        match self {
            Self::LeaseConflict(r)
            | Self::RunMismatch(r)
            | Self::NoPendingMessage(r)
            | Self::UnknownRun(r)
            | Self::MissingInputs(r, _)
            | Self::QueueFull(r) => Some(*r),
            _ => None,
        }
    }

    /// Expected, transient conditions. The caller backs off and tries later.
    pub fn is_retry_later(&self) -> bool {
        matches!(
            self,
            Self::LeaseConflict(_) | Self::NoPendingMessage(_) | Self::QueueFull(_)
        )
    }

    /// The current attempt is dead; restart from `RequestToken`.
    pub fn requires_new_token(&self) -> bool {
        matches!(self, Self::InvalidToken | Self::Expired | Self::RunMismatch(_))
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
            run_id: self.run_id(),
        }
    }

    /// Rebuild the error from a response body. Unknown codes become `Internal`.
    pub fn from_body(body: ErrorBody) -> Self {
        let run = body.run_id.unwrap_or_default();
        match body.code.as_str() {
            "lease_conflict" => Self::LeaseConflict(run),
            "invalid_token" => Self::InvalidToken,
            "expired" => Self::Expired,
            "run_mismatch" => Self::RunMismatch(run),
            "no_pending_message" => Self::NoPendingMessage(run),
            "unknown_run" => Self::UnknownRun(run),
            "missing_inputs" => Self::MissingInputs(run, body.message),
            "queue_full" => Self::QueueFull(run),
            "transport" => Self::Transport(body.message),
            _ => Self::Internal(body.message),
        }
    }
}
