//! Run-scoped messages exchanged outside the inputs/outputs bundle.
//!
//! Content is opaque JSON. Routing uses only the metadata: a message whose
//! `dst_node_id` is [`SERVER_NODE_ID`] is bound for the server, anything else
//! is bound for the worker holding the run's lease.

use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::wire::{now_ms, NodeId, RunId, SERVER_NODE_ID};

/// Well-known `message_type` strings. Extensible.
pub mod msg_types {
    pub const TRAIN: &str = "train";
    pub const EVALUATE: &str = "evaluate";
    pub const QUERY: &str = "query";
    pub const SYSTEM: &str = "system";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Assigned by the channel on push when left empty.
    #[serde(default)]
    pub message_id: String,
    pub run_id: RunId,
    pub src_node_id: NodeId,
    pub dst_node_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<String>,
    pub message_type: String,
    /// Unix ms. Stamped on push when zero.
    #[serde(default)]
    pub created_at: u64,
    /// Seconds until the message is dropped undelivered. 0 = channel default.
    #[serde(default)]
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub metadata: MessageMetadata,
    #[serde(default)]
    pub content: serde_json::Value,
}

impl Message {
    pub fn new(
        run_id: RunId,
        src_node_id: NodeId,
        dst_node_id: NodeId,
        message_type: &str,
        content: serde_json::Value,
    ) -> Self {
        Self {
            metadata: MessageMetadata {
                message_id: String::new(),
                run_id,
                src_node_id,
                dst_node_id,
                reply_to_message_id: None,
                message_type: message_type.to_string(),
                created_at: 0,
                ttl_secs: 0,
            },
            content,
        }
    }

    /// Build a reply: same run and type, endpoints swapped.
    pub fn reply(&self, content: serde_json::Value) -> Self {
        let mut reply = Self::new(
            self.metadata.run_id,
            self.metadata.dst_node_id,
            self.metadata.src_node_id,
            &self.metadata.message_type,
            content,
        );
        reply.metadata.reply_to_message_id = Some(self.metadata.message_id.clone());
        reply
    }

    pub fn run_id(&self) -> RunId {
        self.metadata.run_id
    }

    pub fn is_for_server(&self) -> bool {
        self.metadata.dst_node_id == SERVER_NODE_ID
    }

    /// Fill in `created_at` and `message_id` if the sender left them empty.
    pub fn stamp(&mut self) {
        if self.metadata.created_at == 0 {
            self.metadata.created_at = now_ms();
        }
        if self.metadata.message_id.is_empty() {
            let content = serde_json::to_vec(&self.content).unwrap_or_default();
            self.metadata.message_id =
                crypto::message_id(self.metadata.run_id, self.metadata.created_at, &content);
        }
    }

    /// True once `created_at + ttl` lies in the past.
    pub fn is_expired(&self, now_ms: u64, default_ttl_secs: u64) -> bool {
        let ttl = if self.metadata.ttl_secs == 0 {
            default_ttl_secs
        } else {
            self.metadata.ttl_secs
        };
        if ttl == 0 {
            return false;
        }
        now_ms >= self.metadata.created_at.saturating_add(ttl.saturating_mul(1000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_assigns_id_and_timestamp_once() {
        let mut msg = Message::new(3, 1, SERVER_NODE_ID, msg_types::TRAIN, serde_json::json!({}));
        msg.stamp();
        assert!(msg.metadata.created_at > 0);
        assert_eq!(msg.metadata.message_id.len(), 64);

        let id = msg.metadata.message_id.clone();
        msg.stamp();
        assert_eq!(msg.metadata.message_id, id);
    }

    #[test]
    fn stamp_keeps_sender_supplied_id() {
        let mut msg = Message::new(3, 1, 2, msg_types::QUERY, serde_json::json!(null));
        msg.metadata.message_id = "custom".into();
        msg.stamp();
        assert_eq!(msg.metadata.message_id, "custom");
    }

    #[test]
    fn reply_swaps_endpoints() {
        let mut msg = Message::new(9, SERVER_NODE_ID, 5, msg_types::EVALUATE, serde_json::json!(1));
        msg.stamp();
        let reply = msg.reply(serde_json::json!(2));
        assert_eq!(reply.metadata.src_node_id, 5);
        assert_eq!(reply.metadata.dst_node_id, SERVER_NODE_ID);
        assert_eq!(reply.metadata.run_id, 9);
        assert_eq!(
            reply.metadata.reply_to_message_id.as_deref(),
            Some(msg.metadata.message_id.as_str())
        );
        assert!(reply.is_for_server());
        assert!(!msg.is_for_server());
    }

    #[test]
    fn expiry_uses_own_ttl_before_default() {
        let mut msg = Message::new(1, 0, 1, msg_types::SYSTEM, serde_json::json!(null));
        msg.metadata.created_at = 1_000;

        // default ttl 10s
        assert!(!msg.is_expired(10_999, 10));
        assert!(msg.is_expired(11_000, 10));

        msg.metadata.ttl_secs = 1;
        assert!(msg.is_expired(2_000, 10));
    }

    #[test]
    fn zero_ttl_never_expires() {
        let mut msg = Message::new(1, 0, 1, msg_types::SYSTEM, serde_json::json!(null));
        msg.metadata.created_at = 1;
        assert!(!msg.is_expired(u64::MAX, 0));
    }
}
