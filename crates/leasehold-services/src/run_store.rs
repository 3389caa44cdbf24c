//! Run registry — the server-owned source of Runs, Fabs and Contexts.
//!
//! Components take an `Arc<dyn RunProvider>` at construction; `RunStore` is
//! the in-memory implementation the daemon wires in.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use leasehold_core::wire::now_ms;
use leasehold_core::{Context, ExchangeError, Fab, Run, RunId};

/// Read/write access to run metadata.
pub trait RunProvider: Send + Sync {
    fn get_run(&self, run_id: RunId) -> Option<Run>;

    fn get_fab(&self, fab_hash: &str) -> Option<Fab>;

    /// Context the next input bundle should carry.
    fn get_context(&self, run_id: RunId) -> Option<Context>;

    /// Replace the run's current context. `UnknownRun` if the run is gone.
    fn store_context(&self, context: Context) -> Result<(), ExchangeError>;
}

/// In-memory run registry.
#[derive(Clone, Default)]
pub struct RunStore {
    /// run_id → Run
    runs: Arc<DashMap<RunId, Run>>,
    /// fab hash → Fab. Content-addressed, shared between runs.
    fabs: Arc<DashMap<String, Fab>>,
    /// run_id → current Context
    contexts: Arc<DashMap<RunId, Context>>,
}

impl RunStore {
    pub fn new() -> Self {
        Self {
            runs: Arc::new(DashMap::new()),
            fabs: Arc::new(DashMap::new()),
            contexts: Arc::new(DashMap::new()),
        }
    }

    /// Store a fab under its content hash and return the hash.
    pub fn insert_fab(&self, fab: Fab) -> String {
        let hash = fab.hash_str.clone();
        self.fabs.entry(hash.clone()).or_insert(fab);
        hash
    }

    /// Register a run. Fails if the id is taken.
    pub fn insert_run(&self, mut run: Run) -> Result<Run, ExchangeError> {
        if run.created_at == 0 {
            run.created_at = now_ms();
        }
        match self.runs.entry(run.run_id) {
            Entry::Occupied(_) => Err(ExchangeError::Internal(format!(
                "run {} already exists",
                run.run_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(run.clone());
                Ok(run)
            }
        }
    }

    pub fn contains(&self, run_id: RunId) -> bool {
        self.runs.contains_key(&run_id)
    }

    /// Forget a run and its context. Fabs stay, other runs may share them.
    pub fn remove_run(&self, run_id: RunId) -> bool {
        self.contexts.remove(&run_id);
        self.runs.remove(&run_id).is_some()
    }

    pub fn run_ids(&self) -> Vec<RunId> {
        self.runs.iter().map(|r| *r.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

impl RunProvider for RunStore {
    fn get_run(&self, run_id: RunId) -> Option<Run> {
        self.runs.get(&run_id).map(|r| r.clone())
    }

    fn get_fab(&self, fab_hash: &str) -> Option<Fab> {
        self.fabs.get(fab_hash).map(|f| f.clone())
    }

    fn get_context(&self, run_id: RunId) -> Option<Context> {
        self.contexts.get(&run_id).map(|c| c.clone())
    }

    fn store_context(&self, context: Context) -> Result<(), ExchangeError> {
        if !self.runs.contains_key(&context.run_id) {
            return Err(ExchangeError::UnknownRun(context.run_id));
        }
        self.contexts.insert(context.run_id, context);
        Ok(())
    }
}
