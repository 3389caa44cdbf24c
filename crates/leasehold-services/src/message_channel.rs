//! Per-run message queues between the server and the leaseholding worker.
//!
//! Each run owns a mailbox with two FIFO queues. Worker-bound depth is
//! mirrored into the [`PendingRegistry`] while the mailbox entry is held.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use leasehold_core::config::MessageSettings;
use leasehold_core::wire::now_ms;
use leasehold_core::{ExchangeError, Message, RunId};

use crate::pending::PendingRegistry;

#[derive(Debug, Default)]
struct Mailbox {
    to_worker: VecDeque<Message>,
    to_server: VecDeque<Message>,
}

impl Mailbox {
    fn is_empty(&self) -> bool {
        self.to_worker.is_empty() && self.to_server.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    ToWorker,
    ToServer,
}

/// Queue depths for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub to_worker: usize,
    pub to_server: usize,
}

#[derive(Clone)]
pub struct MessageChannel {
    mailboxes: Arc<DashMap<RunId, Mailbox>>,
    pending: PendingRegistry,
    max_queue_len: usize,
    default_ttl_secs: u64,
    dropped_expired: Arc<AtomicU64>,
}

impl MessageChannel {
    pub fn new(settings: &MessageSettings, pending: PendingRegistry) -> Self {
        Self {
            mailboxes: Arc::new(DashMap::new()),
            pending,
            max_queue_len: settings.max_queue_len,
            default_ttl_secs: settings.default_ttl_secs,
            dropped_expired: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Dequeue the next worker-bound message for `run_id`, skipping any whose
    /// TTL has elapsed.
    pub fn pull(&self, run_id: RunId) -> Result<Message, ExchangeError> {
        let now = now_ms();
        let mut dropped = 0u64;
        let next = {
            let Some(mut mailbox) = self.mailboxes.get_mut(&run_id) else {
                return Err(ExchangeError::NoPendingMessage(run_id));
            };
            let next = loop {
                match mailbox.to_worker.pop_front() {
                    Some(m) if m.is_expired(now, self.default_ttl_secs) => dropped += 1,
                    other => break other,
                }
            };
            self.pending.set_queued(run_id, mailbox.to_worker.len());
            next
        };
        self.mailboxes.remove_if(&run_id, |_, m| m.is_empty());

        if dropped > 0 {
            self.dropped_expired.fetch_add(dropped, Ordering::Relaxed);
            tracing::debug!(run_id, dropped, "expired messages dropped");
        }
        let message = next.ok_or(ExchangeError::NoPendingMessage(run_id))?;
        tracing::debug!(
            run_id,
            message_id = %message.metadata.message_id,
            "message dequeued"
        );
        Ok(message)
    }

    /// Accept a message from the worker. Routed by destination: the server
    /// node gets it in its outbox, anything else joins the worker-bound queue.
    /// Returns the assigned message id.
    pub fn push(&self, message: Message) -> Result<String, ExchangeError> {
        let direction = if message.is_for_server() {
            Direction::ToServer
        } else {
            Direction::ToWorker
        };
        self.enqueue(message, direction)
    }

    /// Queue a server-originated message for the run's worker.
    pub fn enqueue_for_worker(&self, message: Message) -> Result<String, ExchangeError> {
        self.enqueue(message, Direction::ToWorker)
    }

    /// Take everything the worker sent to the server for `run_id`.
    pub fn drain_for_server(&self, run_id: RunId) -> Vec<Message> {
        let now = now_ms();
        let drained: Vec<Message> = match self.mailboxes.get_mut(&run_id) {
            Some(mut mailbox) => mailbox.to_server.drain(..).collect(),
            None => return Vec::new(),
        };
        self.mailboxes.remove_if(&run_id, |_, m| m.is_empty());

        let (live, expired): (Vec<_>, Vec<_>) = drained
            .into_iter()
            .partition(|m| !m.is_expired(now, self.default_ttl_secs));
        if !expired.is_empty() {
            self.dropped_expired
                .fetch_add(expired.len() as u64, Ordering::Relaxed);
        }
        live
    }

    /// Drop both queues of a run.
    pub fn discard_run(&self, run_id: RunId) -> QueueDepth {
        let depth = self
            .mailboxes
            .remove(&run_id)
            .map(|(_, m)| QueueDepth {
                to_worker: m.to_worker.len(),
                to_server: m.to_server.len(),
            })
            .unwrap_or_default();
        self.pending.set_queued(run_id, 0);
        depth
    }

    pub fn depth(&self, run_id: RunId) -> QueueDepth {
        self.mailboxes
            .get(&run_id)
            .map(|m| QueueDepth {
                to_worker: m.to_worker.len(),
                to_server: m.to_server.len(),
            })
            .unwrap_or_default()
    }

    pub fn depths(&self) -> Vec<(RunId, QueueDepth)> {
        self.mailboxes
            .iter()
            .map(|m| {
                (
                    *m.key(),
                    QueueDepth {
                        to_worker: m.to_worker.len(),
                        to_server: m.to_server.len(),
                    },
                )
            })
            .collect()
    }

    /// Remove TTL-expired messages from every queue. Returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = now_ms();
        let ttl = self.default_ttl_secs;
        let mut purged = 0;
        for mut entry in self.mailboxes.iter_mut() {
            let run_id = *entry.key();
            let mailbox = entry.value_mut();
            let before = mailbox.to_worker.len() + mailbox.to_server.len();
            mailbox.to_worker.retain(|m| !m.is_expired(now, ttl));
            mailbox.to_server.retain(|m| !m.is_expired(now, ttl));
            purged += before - (mailbox.to_worker.len() + mailbox.to_server.len());
            self.pending.set_queued(run_id, mailbox.to_worker.len());
        }
        self.mailboxes.retain(|_, m| !m.is_empty());

        if purged > 0 {
            self.dropped_expired
                .fetch_add(purged as u64, Ordering::Relaxed);
            tracing::debug!(purged, "expired messages purged");
        }
        purged
    }

    pub fn dropped_expired(&self) -> u64 {
        self.dropped_expired.load(Ordering::Relaxed)
    }

    fn enqueue(&self, mut message: Message, direction: Direction) -> Result<String, ExchangeError> {
        message.stamp();
        let run_id = message.run_id();
        let message_id = message.metadata.message_id.clone();

        let mut mailbox = self.mailboxes.entry(run_id).or_default();
        let queue = match direction {
            Direction::ToWorker => &mut mailbox.to_worker,
            Direction::ToServer => &mut mailbox.to_server,
        };
        if self.max_queue_len > 0 && queue.len() >= self.max_queue_len {
            tracing::warn!(run_id, ?direction, len = queue.len(), "message queue full");
            return Err(ExchangeError::QueueFull(run_id));
        }
        queue.push_back(message);
        if direction == Direction::ToWorker {
            self.pending.set_queued(run_id, mailbox.to_worker.len());
        }
        drop(mailbox);

        tracing::debug!(run_id, ?direction, message_id = %message_id, "message enqueued");
        Ok(message_id)
    }
}
