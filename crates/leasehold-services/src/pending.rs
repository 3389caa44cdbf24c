//! Pending-work registry — which runs have something a worker should pick up.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use leasehold_core::RunId;

/// Outstanding work for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PendingEntry {
    /// An input bundle has been scheduled and no outputs came back yet.
    pub inputs_pending: bool,
    /// Identifies the scheduled bundle. Unique across runs and never reused.
    pub inputs_generation: u64,
    /// Worker-bound messages currently queued.
    pub queued_messages: usize,
}

impl PendingEntry {
    pub fn has_work(&self) -> bool {
        self.inputs_pending || self.queued_messages > 0
    }

    /// Generation of the pending bundle, if any.
    pub fn generation(&self) -> Option<u64> {
        self.inputs_pending.then_some(self.inputs_generation)
    }
}

/// In-memory pending-work registry. Entries without work are removed.
///
/// Scheduling inputs and settling them against pushed outputs both happen
/// under the run's entry lock, so a round scheduled while a lease is out is
/// never mistaken for the round that lease delivered.
#[derive(Clone, Default)]
pub struct PendingRegistry {
    entries: Arc<DashMap<RunId, PendingEntry>>,
    generations: Arc<AtomicU64>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new input bundle is waiting for `run_id`. Returns its generation.
    pub fn mark_inputs(&self, run_id: RunId) -> u64 {
        let mut entry = self.entries.entry(run_id).or_default();
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        entry.inputs_pending = true;
        entry.inputs_generation = generation;
        generation
    }

    /// Run `store` and, if it succeeds, mark a new bundle pending, all under
    /// the run's entry lock.
    pub fn schedule_inputs<E>(
        &self,
        run_id: RunId,
        store: impl FnOnce() -> Result<(), E>,
    ) -> Result<u64, E> {
        let mut entry = self.entries.entry(run_id).or_default();
        if let Err(e) = store() {
            drop(entry);
            self.entries.remove_if(&run_id, |_, p| !p.has_work());
            return Err(e);
        }
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        entry.inputs_pending = true;
        entry.inputs_generation = generation;
        Ok(generation)
    }

    /// Generation of the bundle currently pending for `run_id`.
    pub fn inputs_generation(&self, run_id: RunId) -> Option<u64> {
        self.entries.get(&run_id).and_then(|e| e.generation())
    }

    /// Settle outputs computed from the bundle of generation `delivered`
    /// (`None` when no bundle was delivered).
    ///
    /// Only if that is still the pending bundle, or nothing is pending and
    /// nothing was delivered, `store` runs and the inputs stop being pending.
    /// Returns whether the outputs were current.
    pub fn settle_inputs<E>(
        &self,
        run_id: RunId,
        delivered: Option<u64>,
        store: impl FnOnce() -> Result<(), E>,
    ) -> Result<bool, E> {
        let mut entry = self.entries.entry(run_id).or_default();
        let current = entry.generation() == delivered;
        let stored = if current { store() } else { Ok(()) };
        if current && stored.is_ok() {
            entry.inputs_pending = false;
        }
        drop(entry);
        self.entries.remove_if(&run_id, |_, e| !e.has_work());
        stored.map(|_| current)
    }

    /// Record the current worker-bound queue depth for `run_id`.
    pub fn set_queued(&self, run_id: RunId, queued: usize) {
        if queued == 0 {
            self.update(run_id, |e| e.queued_messages = 0);
        } else {
            self.entries.entry(run_id).or_default().queued_messages = queued;
        }
    }

    pub fn remove(&self, run_id: RunId) {
        self.entries.remove(&run_id);
    }

    pub fn get(&self, run_id: RunId) -> Option<PendingEntry> {
        self.entries.get(&run_id).map(|e| *e)
    }

    pub fn is_pending(&self, run_id: RunId) -> bool {
        self.get(run_id).map(|e| e.has_work()).unwrap_or(false)
    }

    /// Snapshot of every run with work. No ordering guarantee.
    pub fn list(&self) -> Vec<RunId> {
        self.entries
            .iter()
            .filter(|e| e.value().has_work())
            .map(|e| *e.key())
            .collect()
    }

    /// Mutate an existing entry and drop it if it no longer carries work.
    fn update(&self, run_id: RunId, f: impl FnOnce(&mut PendingEntry)) {
        if let Some(mut entry) = self.entries.get_mut(&run_id) {
            f(&mut entry);
        }
        self.entries.remove_if(&run_id, |_, e| !e.has_work());
    }
}
