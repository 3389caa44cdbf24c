//! HTTP API handlers — the app-IO protocol plus the admin surface, as JSON.

pub mod admin;
pub mod appio;
pub mod status;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use leasehold_core::ExchangeError;
use leasehold_services::ExchangeService;

#[derive(Clone)]
pub struct ApiState {
    pub service: ExchangeService,
    /// Shutdown broadcast sender — signals graceful daemon shutdown.
    pub shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Protocol error rendered as `{code, message, run_id?}`.
#[derive(Debug)]
pub struct ApiError(pub ExchangeError);

impl From<ExchangeError> for ApiError {
    fn from(e: ExchangeError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ExchangeError::LeaseConflict(_) => StatusCode::CONFLICT,
            ExchangeError::InvalidToken | ExchangeError::Expired => StatusCode::UNAUTHORIZED,
            ExchangeError::RunMismatch(_) => StatusCode::FORBIDDEN,
            ExchangeError::NoPendingMessage(_) | ExchangeError::UnknownRun(_) => {
                StatusCode::NOT_FOUND
            }
            ExchangeError::MissingInputs(..) => StatusCode::UNPROCESSABLE_ENTITY,
            ExchangeError::QueueFull(_) => StatusCode::TOO_MANY_REQUESTS,
            ExchangeError::Transport(_) | ExchangeError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(code = self.0.code(), run_id = ?self.0.run_id(), "request rejected");
        }
        (status, Json(self.0.to_body())).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

// Re-export handler functions for use in router setup.
pub use admin::{
    handle_discard_run, handle_drain_messages, handle_enqueue_message, handle_outputs,
    handle_register_run, handle_submit_context,
};
pub use appio::{
    handle_pending_runs, handle_pull_inputs, handle_pull_message, handle_push_message,
    handle_push_outputs, handle_request_token,
};
pub use status::{handle_shutdown, handle_status};
