//! /admin/runs handlers — server-side run, context and message management.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use leasehold_core::wire::{Ack, DrainResponse, EnqueueResponse, RegisterRunRequest};
use leasehold_core::{Context, Message, Run, RunId};
use leasehold_services::OutputsRecord;

use super::{ApiResult, ApiState};

// ── /admin/runs (POST) ────────────────────────────────────────────────────────

pub async fn handle_register_run(
    State(state): State<ApiState>,
    Json(req): Json<RegisterRunRequest>,
) -> ApiResult<Run> {
    Ok(Json(state.service.register_run(req)?))
}

// ── /admin/runs/{run_id}/context (POST) ───────────────────────────────────────

pub async fn handle_submit_context(
    State(state): State<ApiState>,
    Path(run_id): Path<RunId>,
    Json(context): Json<Context>,
) -> ApiResult<Ack> {
    state.service.submit_context(run_id, context)?;
    Ok(Json(Ack {}))
}

// ── /admin/runs/{run_id}/messages (POST, GET) ─────────────────────────────────

pub async fn handle_enqueue_message(
    State(state): State<ApiState>,
    Path(run_id): Path<RunId>,
    Json(message): Json<Message>,
) -> ApiResult<EnqueueResponse> {
    let message_id = state.service.enqueue_message(run_id, message)?;
    Ok(Json(EnqueueResponse { message_id }))
}

pub async fn handle_drain_messages(
    State(state): State<ApiState>,
    Path(run_id): Path<RunId>,
) -> ApiResult<DrainResponse> {
    let messages = state.service.drain_messages(run_id)?;
    Ok(Json(DrainResponse { messages }))
}

// ── /admin/runs/{run_id}/outputs (GET) ────────────────────────────────────────

#[derive(Serialize)]
pub struct OutputsResponse {
    pub run_id: RunId,
    pub outputs: Vec<OutputsRecord>,
}

pub async fn handle_outputs(
    State(state): State<ApiState>,
    Path(run_id): Path<RunId>,
) -> ApiResult<OutputsResponse> {
    let outputs = state.service.outputs_for(run_id)?;
    Ok(Json(OutputsResponse { run_id, outputs }))
}

// ── /admin/runs/{run_id} (DELETE) ─────────────────────────────────────────────

pub async fn handle_discard_run(
    State(state): State<ApiState>,
    Path(run_id): Path<RunId>,
) -> ApiResult<Ack> {
    state.service.discard_run(run_id)?;
    Ok(Json(Ack {}))
}
