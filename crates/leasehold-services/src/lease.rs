//! Lease table — single-use capability tokens, at most one live lease per run.
//!
//! Three maps, always locked in this order:
//!   leases     run_id → current lease record (the per-run mutual-exclusion slot)
//!   tokens     token digest → run_id
//!   tombstones token digest → why the token died (retired / expired)
//!
//! The plaintext token never enters any of them. Expiry is checked lazily on
//! every access and reclaimed eagerly by [`LeaseManager::sweep`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use leasehold_core::config::LeaseSettings;
use leasehold_core::crypto::fingerprint;
use leasehold_core::{ExchangeError, RunId, Token, TokenDigest};

/// Lifecycle of one lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaseState {
    Issued,
    InputsPulled,
    OutputsPushed,
    Expired,
}

impl LeaseState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::OutputsPushed | Self::Expired)
    }
}

#[derive(Debug, Clone)]
struct LeaseRecord {
    digest: TokenDigest,
    issued_at: Instant,
    expires_at: Instant,
    state: LeaseState,
}

impl LeaseRecord {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    fn snapshot(&self, run_id: RunId) -> Lease {
        Lease {
            run_id,
            digest: self.digest,
            state: self.state,
            issued_at: self.issued_at,
            expires_at: self.expires_at,
        }
    }
}

/// Point-in-time view of a lease. Carries the digest, never the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub run_id: RunId,
    pub digest: TokenDigest,
    pub state: LeaseState,
    pub issued_at: Instant,
    pub expires_at: Instant,
}

impl Lease {
    /// Log-safe lease id.
    pub fn id(&self) -> String {
        fingerprint(&self.digest)
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Burial {
    Retired,
    Expired,
}

#[derive(Debug, Clone, Copy)]
struct Tombstone {
    run_id: RunId,
    reason: Burial,
    at: Instant,
}

#[derive(Default)]
struct Counters {
    issued: AtomicU64,
    retired: AtomicU64,
    expired: AtomicU64,
    conflicts: AtomicU64,
}

/// Lifetime counters plus the current table size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LeaseStats {
    pub issued: u64,
    pub retired: u64,
    pub expired: u64,
    pub conflicts: u64,
    pub active: usize,
}

/// Issues, validates, retires and expires leases.
#[derive(Clone)]
pub struct LeaseManager {
    ttl: Duration,
    refresh_on_access: bool,
    tombstone_retention: Duration,
    leases: Arc<DashMap<RunId, LeaseRecord>>,
    tokens: Arc<DashMap<TokenDigest, RunId>>,
    tombstones: Arc<DashMap<TokenDigest, Tombstone>>,
    counters: Arc<Counters>,
}

impl LeaseManager {
    pub fn new(settings: &LeaseSettings) -> Self {
        Self {
            ttl: settings.ttl(),
            refresh_on_access: settings.refresh_on_access,
            tombstone_retention: settings.tombstone_retention(),
            leases: Arc::new(DashMap::new()),
            tokens: Arc::new(DashMap::new()),
            tombstones: Arc::new(DashMap::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Issue a lease on `run_id`.
    ///
    /// The check and the insert happen under the run's map entry, so two
    /// concurrent requests for one run cannot both succeed. An expired lease
    /// still occupying the slot is reclaimed on the spot.
    pub fn request_token(&self, run_id: RunId) -> Result<(Token, Lease), ExchangeError> {
        let now = Instant::now();
        let token = Token::generate();
        let record = LeaseRecord {
            digest: token.digest(),
            issued_at: now,
            expires_at: now + self.ttl,
            state: LeaseState::Issued,
        };

        match self.leases.entry(run_id) {
            Entry::Occupied(mut slot) => {
                if !slot.get().is_expired(now) {
                    self.counters.conflicts.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        run_id,
                        holder = fingerprint(&slot.get().digest),
                        "lease request rejected, run already leased"
                    );
                    return Err(ExchangeError::LeaseConflict(run_id));
                }
                let stale = slot.insert(record.clone());
                self.tokens.insert(record.digest, run_id);
                self.bury(run_id, &stale, Burial::Expired, now);
                tracing::info!(
                    run_id,
                    lease = fingerprint(&stale.digest),
                    "expired lease reclaimed"
                );
            }
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                self.tokens.insert(record.digest, run_id);
            }
        }

        self.counters.issued.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            run_id,
            lease = fingerprint(&record.digest),
            ttl_secs = self.ttl.as_secs(),
            "lease issued"
        );
        Ok((token, record.snapshot(run_id)))
    }

    /// Validate `token` for `run_id`.
    pub fn validate(&self, token: &Token, run_id: RunId) -> Result<Lease, ExchangeError> {
        self.check(token, Some(run_id), Instant::now())
    }

    /// Validate `token` and return the lease it is bound to.
    pub fn resolve(&self, token: &Token) -> Result<Lease, ExchangeError> {
        self.check(token, None, Instant::now())
    }

    /// Like [`resolve`](Self::resolve), but an expired token is still honoured
    /// as long as nobody has leased its run since. Retired tokens never are.
    pub fn resolve_possession(
        &self,
        token: &Token,
        expected: Option<RunId>,
    ) -> Result<RunId, ExchangeError> {
        let now = Instant::now();
        match self.check(token, expected, now) {
            Ok(lease) => Ok(lease.run_id),
            Err(ExchangeError::Expired) => {
                let tomb = self
                    .tombstones
                    .get(&token.digest())
                    .map(|t| *t)
                    .ok_or(ExchangeError::Expired)?;
                if let Some(expected) = expected.filter(|r| *r != tomb.run_id) {
                    return Err(ExchangeError::RunMismatch(expected));
                }
                if self.has_active_lease_at(tomb.run_id, now) {
                    return Err(ExchangeError::Expired);
                }
                Ok(tomb.run_id)
            }
            Err(e) => Err(e),
        }
    }

    /// Move the lease from `Issued` to `InputsPulled`. No-op in any other state.
    pub fn mark_inputs_pulled(&self, lease: &Lease) {
        if let Some(mut record) = self.leases.get_mut(&lease.run_id) {
            if record.digest == lease.digest && record.state == LeaseState::Issued {
                record.state = LeaseState::InputsPulled;
            }
        }
    }

    /// Atomically validate and retire the lease behind `token`.
    ///
    /// Exactly one caller per lease gets `Ok`. An expired lease is reclaimed
    /// and reported as `Expired`.
    pub fn consume(&self, token: &Token) -> Result<Lease, ExchangeError> {
        let now = Instant::now();
        let digest = token.digest();
        let run_id = self
            .tokens
            .get(&digest)
            .map(|r| *r)
            .ok_or_else(|| self.dead_token_error(&digest))?;

        match self.leases.entry(run_id) {
            Entry::Occupied(slot) if slot.get().digest == digest => {
                let (_, record) = slot.remove_entry();
                if record.is_expired(now) {
                    self.bury(run_id, &record, Burial::Expired, now);
                    tracing::info!(run_id, lease = fingerprint(&digest), "lease expired");
                    return Err(ExchangeError::Expired);
                }
                self.bury(run_id, &record, Burial::Retired, now);
                tracing::info!(
                    run_id,
                    lease = fingerprint(&digest),
                    held_ms = now.duration_since(record.issued_at).as_millis() as u64,
                    "lease retired"
                );
                let mut lease = record.snapshot(run_id);
                lease.state = LeaseState::OutputsPushed;
                Ok(lease)
            }
            _ => Err(self.dead_token_error(&digest)),
        }
    }

    /// Retire the lease behind `token`. Unknown or already-dead tokens are a no-op.
    pub fn retire(&self, token: &Token) {
        let digest = token.digest();
        let Some(run_id) = self.tokens.get(&digest).map(|r| *r) else {
            return;
        };
        if let Some((_, record)) = self.leases.remove_if(&run_id, |_, r| r.digest == digest) {
            self.bury(run_id, &record, Burial::Retired, Instant::now());
            tracing::info!(run_id, lease = fingerprint(&digest), "lease retired");
        }
    }

    /// Drop whatever lease `run_id` holds. Used when a run is discarded.
    pub fn release_run(&self, run_id: RunId) {
        if let Some((_, record)) = self.leases.remove(&run_id) {
            self.bury(run_id, &record, Burial::Retired, Instant::now());
            tracing::debug!(run_id, lease = fingerprint(&record.digest), "lease released");
        }
    }

    pub fn has_active_lease(&self, run_id: RunId) -> bool {
        self.has_active_lease_at(run_id, Instant::now())
    }

    /// Current lease on `run_id`, expired or not.
    pub fn current(&self, run_id: RunId) -> Option<Lease> {
        self.leases.get(&run_id).map(|r| r.snapshot(run_id))
    }

    /// Reclaim every lease past its deadline and forget old tombstones.
    /// Returns the reclaimed leases.
    pub fn sweep(&self) -> Vec<Lease> {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> Vec<Lease> {
        let stale: Vec<(RunId, TokenDigest)> = self
            .leases
            .iter()
            .filter(|e| e.value().is_expired(now))
            .map(|e| (*e.key(), e.value().digest))
            .collect();

        let reclaimed: Vec<Lease> = stale
            .into_iter()
            .filter_map(|(run_id, digest)| self.expire(run_id, digest, now))
            .collect();

        let retention = self.tombstone_retention;
        self.tombstones
            .retain(|_, t| now.saturating_duration_since(t.at) < retention);

        reclaimed
    }

    pub fn snapshot(&self) -> Vec<Lease> {
        self.leases
            .iter()
            .map(|e| e.value().snapshot(*e.key()))
            .collect()
    }

    pub fn stats(&self) -> LeaseStats {
        LeaseStats {
            issued: self.counters.issued.load(Ordering::Relaxed),
            retired: self.counters.retired.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            conflicts: self.counters.conflicts.load(Ordering::Relaxed),
            active: self.leases.len(),
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn check(
        &self,
        token: &Token,
        expected: Option<RunId>,
        now: Instant,
    ) -> Result<Lease, ExchangeError> {
        let digest = token.digest();
        let Some(run_id) = self.tokens.get(&digest).map(|r| *r) else {
            return Err(self.dead_token_error(&digest));
        };

        let Some(mut record) = self
            .leases
            .get_mut(&run_id)
            .filter(|r| r.digest == digest)
        else {
            return Err(self.dead_token_error(&digest));
        };

        // an expired lease answers Expired whatever run the caller names,
        // swept or not
        if record.is_expired(now) {
            drop(record);
            self.expire(run_id, digest, now);
            return Err(ExchangeError::Expired);
        }
        if let Some(expected) = expected.filter(|r| *r != run_id) {
            return Err(ExchangeError::RunMismatch(expected));
        }
        if self.refresh_on_access {
            record.expires_at = now + self.ttl;
        }
        Ok(record.snapshot(run_id))
    }

    fn has_active_lease_at(&self, run_id: RunId, now: Instant) -> bool {
        self.leases
            .get(&run_id)
            .map(|r| !r.is_expired(now))
            .unwrap_or(false)
    }

    /// Remove the lease if it is still `digest`'s and still expired.
    fn expire(&self, run_id: RunId, digest: TokenDigest, now: Instant) -> Option<Lease> {
        let (_, record) = self
            .leases
            .remove_if(&run_id, |_, r| r.digest == digest && r.is_expired(now))?;
        self.bury(run_id, &record, Burial::Expired, now);
        tracing::info!(run_id, lease = fingerprint(&digest), "lease expired");

        let mut lease = record.snapshot(run_id);
        lease.state = LeaseState::Expired;
        Some(lease)
    }

    fn bury(&self, run_id: RunId, record: &LeaseRecord, reason: Burial, now: Instant) {
        self.tokens.remove(&record.digest);
        self.tombstones.insert(
            record.digest,
            Tombstone {
                run_id,
                reason,
                at: now,
            },
        );
        let counter = match reason {
            Burial::Retired => &self.counters.retired,
            Burial::Expired => &self.counters.expired,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn dead_token_error(&self, digest: &TokenDigest) -> ExchangeError {
        match self.tombstones.get(digest).map(|t| t.reason) {
            Some(Burial::Expired) => ExchangeError::Expired,
            _ => ExchangeError::InvalidToken,
        }
    }
}
