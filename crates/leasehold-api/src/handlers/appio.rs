//! /v0/appio/* handlers — the six worker-facing protocol operations.

use axum::extract::State;
use axum::Json;

use leasehold_core::wire::{
    Ack, PendingRunsResponse, PullMessageResponse, PushMessageRequest, PushOutputsRequest,
    PushOutputsResponse, RequestTokenRequest, RequestTokenResponse, TokenRequest,
};
use leasehold_core::ClientAppInputs;

use super::{ApiResult, ApiState};

// ── get-runs-with-pending-messages ────────────────────────────────────────────

pub async fn handle_pending_runs(State(state): State<ApiState>) -> ApiResult<PendingRunsResponse> {
    Ok(Json(PendingRunsResponse {
        run_ids: state.service.pending_runs(),
    }))
}

// ── request-token ─────────────────────────────────────────────────────────────

pub async fn handle_request_token(
    State(state): State<ApiState>,
    Json(req): Json<RequestTokenRequest>,
) -> ApiResult<RequestTokenResponse> {
    let token = state.service.issue_token(req.run_id)?;
    Ok(Json(RequestTokenResponse { token }))
}

// ── pull-inputs ───────────────────────────────────────────────────────────────

pub async fn handle_pull_inputs(
    State(state): State<ApiState>,
    Json(req): Json<TokenRequest>,
) -> ApiResult<ClientAppInputs> {
    let bundle = state.service.pull_inputs(&req.token)?;
    Ok(Json(ClientAppInputs::clone(&bundle)))
}

// ── push-outputs ──────────────────────────────────────────────────────────────

pub async fn handle_push_outputs(
    State(state): State<ApiState>,
    Json(req): Json<PushOutputsRequest>,
) -> ApiResult<PushOutputsResponse> {
    let status = state.service.push_outputs(&req.token, req.context)?;
    Ok(Json(PushOutputsResponse { status }))
}

// ── pull-message ──────────────────────────────────────────────────────────────

pub async fn handle_pull_message(
    State(state): State<ApiState>,
    Json(req): Json<TokenRequest>,
) -> ApiResult<PullMessageResponse> {
    let message = state.service.next_message(&req.token)?;
    Ok(Json(PullMessageResponse { message }))
}

// ── push-message ──────────────────────────────────────────────────────────────

pub async fn handle_push_message(
    State(state): State<ApiState>,
    Json(req): Json<PushMessageRequest>,
) -> ApiResult<Ack> {
    state.service.accept_message(&req.token, req.message)?;
    Ok(Json(Ack {}))
}
