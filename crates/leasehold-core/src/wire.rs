//! leasehold wire format — the JSON bodies of the app-IO protocol.
//!
//! These types ARE the protocol. Workers and the server exchange exactly
//! these shapes over HTTP; renaming a field is a breaking change.
//!
//! Binary payloads (fab content) travel hex-encoded.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::crypto::{fab_hash, Token};
use crate::message::Message;

/// Identifies one logical execution tracked by the server.
pub type RunId = u64;

/// Identifies a participant in message exchange.
pub type NodeId = u64;

/// Messages addressed to this node are for the server, not for a worker.
pub const SERVER_NODE_ID: NodeId = 0;

/// Unix ms, saturating to 0 if the clock is before the epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── Endpoint paths ────────────────────────────────────────────────────────────

/// Protocol endpoints, relative to the `/api` prefix.
pub mod paths {
    pub const GET_RUNS_WITH_PENDING_MESSAGES: &str = "/v0/appio/get-runs-with-pending-messages";
    pub const REQUEST_TOKEN: &str = "/v0/appio/request-token";
    pub const PULL_INPUTS: &str = "/v0/appio/pull-inputs";
    pub const PUSH_OUTPUTS: &str = "/v0/appio/push-outputs";
    pub const PULL_MESSAGE: &str = "/v0/appio/pull-message";
    pub const PUSH_MESSAGE: &str = "/v0/appio/push-message";
}

// ── Payloads ──────────────────────────────────────────────────────────────────

/// Run descriptor handed to the worker alongside its inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: RunId,
    pub fab_id: String,
    pub fab_version: String,
    /// `hash_str` of the fab this run executes.
    pub fab_hash: String,
    #[serde(default)]
    pub override_config: serde_json::Map<String, serde_json::Value>,
    /// Unix ms when the run was registered.
    #[serde(default)]
    pub created_at: u64,
}

/// Executable bundle. Content is opaque to the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fab {
    pub hash_str: String,
    #[serde(with = "hex_bytes")]
    pub content: Bytes,
}

impl Fab {
    /// Build a fab, deriving `hash_str` from the content.
    pub fn new(content: impl Into<Bytes>) -> Self {
        let content = content.into();
        Self {
            hash_str: fab_hash(&content),
            content,
        }
    }

    /// True if `hash_str` matches the content.
    pub fn verify(&self) -> bool {
        self.hash_str == fab_hash(&self.content)
    }
}

/// Execution context of one worker for one run. Round-tripped through the
/// worker: pulled with the inputs, pushed back (updated) with the outputs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Context {
    #[serde(default)]
    pub run_id: RunId,
    #[serde(default)]
    pub node_id: NodeId,
    #[serde(default)]
    pub node_config: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub state: serde_json::Value,
    #[serde(default)]
    pub run_config: serde_json::Map<String, serde_json::Value>,
}

/// The atomic input bundle of one lease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientAppInputs {
    pub context: Context,
    pub run: Run,
    pub fab: Fab,
}

/// Outcome code of an outputs push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeCode {
    Success,
    DeadlineExceeded,
    UnknownError,
}

/// Outcome of an outputs push, as reported to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeStatus {
    pub code: OutcomeCode,
    #[serde(default)]
    pub message: String,
}

impl OutcomeStatus {
    pub fn success() -> Self {
        Self {
            code: OutcomeCode::Success,
            message: String::new(),
        }
    }

    pub fn deadline_exceeded() -> Self {
        Self {
            code: OutcomeCode::DeadlineExceeded,
            message: "lease expired before outputs arrived; result discarded".to_string(),
        }
    }

    pub fn unknown_error(message: impl Into<String>) -> Self {
        Self {
            code: OutcomeCode::UnknownError,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == OutcomeCode::Success
    }
}

// ── Request / response bodies ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PendingRunsResponse {
    pub run_ids: Vec<RunId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestTokenRequest {
    pub run_id: RunId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestTokenResponse {
    pub token: Token,
}

/// Body of the calls that carry nothing but the token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRequest {
    pub token: Token,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushOutputsRequest {
    pub token: Token,
    pub context: Context,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushOutputsResponse {
    pub status: OutcomeStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullMessageResponse {
    pub message: Message,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMessageRequest {
    pub token: Token,
    pub message: Message,
}

/// Empty acknowledgment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ack {}

/// Error body returned with every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
}

// ── Admin bodies ──────────────────────────────────────────────────────────────

/// Register a run together with its fab.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRunRequest {
    /// Random when absent.
    #[serde(default)]
    pub run_id: Option<RunId>,
    pub fab_id: String,
    pub fab_version: String,
    #[serde(with = "hex_bytes")]
    pub fab_content: Bytes,
    #[serde(default)]
    pub override_config: serde_json::Map<String, serde_json::Value>,
    /// First round's context. Present means inputs are pending right away.
    #[serde(default)]
    pub context: Option<Context>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub message_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DrainResponse {
    pub messages: Vec<Message>,
}

// ── Serde helpers ─────────────────────────────────────────────────────────────

/// Serialize `Bytes` as a lowercase hex string.
pub mod hex_bytes {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Bytes, D::Error> {
        let text = String::deserialize(d)?;
        hex::decode(text)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
