//! Input bundles, assembled once per lease and then served from cache.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use leasehold_core::{ClientAppInputs, ExchangeError, RunId, Token, TokenDigest};

use crate::lease::LeaseManager;
use crate::pending::PendingRegistry;
use crate::run_store::RunProvider;

struct CachedInputs {
    run_id: RunId,
    /// Pending generation read before the bundle was assembled.
    generation: Option<u64>,
    bundle: Arc<ClientAppInputs>,
}

#[derive(Clone)]
pub struct InputsStore {
    leases: LeaseManager,
    runs: Arc<dyn RunProvider>,
    pending: PendingRegistry,
    /// lease digest → bundle delivered under that lease
    cache: Arc<DashMap<TokenDigest, CachedInputs>>,
}

impl InputsStore {
    pub fn new(leases: LeaseManager, runs: Arc<dyn RunProvider>, pending: PendingRegistry) -> Self {
        Self {
            leases,
            runs,
            pending,
            cache: Arc::new(DashMap::new()),
        }
    }

    /// Bundle for the run `token` is bound to. Every pull within one lease
    /// returns the same bundle, even if the run's context changes meanwhile.
    pub fn pull(&self, token: &Token) -> Result<Arc<ClientAppInputs>, ExchangeError> {
        let lease = self.leases.resolve(token)?;

        let bundle = match self.cache.entry(lease.digest) {
            Entry::Occupied(hit) => hit.get().bundle.clone(),
            Entry::Vacant(slot) => {
                // read first: a round scheduled during assembly must not
                // be credited to this lease
                let generation = self.pending.inputs_generation(lease.run_id);
                let bundle = Arc::new(self.assemble(lease.run_id)?);
                slot.insert(CachedInputs {
                    run_id: lease.run_id,
                    generation,
                    bundle: bundle.clone(),
                });
                tracing::info!(
                    run_id = lease.run_id,
                    lease = %lease.id(),
                    fab = %bundle.fab.hash_str,
                    "inputs delivered"
                );
                bundle
            }
        };

        self.leases.mark_inputs_pulled(&lease);
        Ok(bundle)
    }

    /// Forget the bundle cached for a lease. Returns the pending generation
    /// it was assembled from, or `None` if nothing was delivered.
    pub fn release(&self, digest: &TokenDigest) -> Option<u64> {
        self.cache.remove(digest).and_then(|(_, c)| c.generation)
    }

    pub fn release_run(&self, run_id: RunId) {
        self.cache.retain(|_, c| c.run_id != run_id);
    }

    /// Drop bundles whose lease is no longer the run's current one.
    pub fn prune(&self) -> usize {
        let before = self.cache.len();
        self.cache.retain(|digest, c| {
            self.leases
                .current(c.run_id)
                .map(|l| l.digest == *digest)
                .unwrap_or(false)
        });
        before.saturating_sub(self.cache.len())
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    fn assemble(&self, run_id: RunId) -> Result<ClientAppInputs, ExchangeError> {
        let run = self
            .runs
            .get_run(run_id)
            .ok_or(ExchangeError::UnknownRun(run_id))?;
        let context = self
            .runs
            .get_context(run_id)
            .ok_or_else(|| ExchangeError::MissingInputs(run_id, "no context scheduled".into()))?;
        let fab = self.runs.get_fab(&run.fab_hash).ok_or_else(|| {
            ExchangeError::MissingInputs(run_id, format!("fab {} is not registered", run.fab_hash))
        })?;
        Ok(ClientAppInputs { context, run, fab })
    }
}
