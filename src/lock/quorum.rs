//! Quorum lock
//!
//! Majority-based lease over N independent stores.
//!
//! ## Acquisition
//! 1. Fresh token, `t0 = clock.now()`
//! 2. `set_if_absent` on every store concurrently, each bounded by
//!    `min(store_timeout, budget)`
//! 3. Success iff `grants >= N/2 + 1` and `ttl - elapsed - drift > 0`;
//!    the handle records exactly the granting stores
//! 4. Otherwise delete the token from every store that granted or did not
//!    answer in time, and report `Timeout`
//!
//! ## Timing
//! Lease validity is measured with the lock's [`Clock`]. Waiting on stores and
//! on the budget is real time. Each store call runs on its own detached
//! thread, so a hung store never holds the caller past its deadline. Replies
//! are handed over on a rendezvous channel: an answer the caller no longer
//! waits for is refused, and a refused `set_if_absent` grant is deleted again
//! by its thread. Until that delete lands the late write holds the key, at
//! most until its TTL if the store stays unreachable.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel;
use crossbeam::select;

use crate::clock::{Clock, SystemClock};
use crate::config::LockConfig;
use crate::error::{self, AcquireError, ConfigError, ExtendError, ReleaseError, StoreError};
use crate::store::StoreClient;

use super::{
    ttl_fits, validate_request, CancelToken, HandleState, LeaseLock, LockHandle, LockToken,
    ReleaseOutcome,
};

/// Replies gathered from one round of concurrent store calls
struct Round {
    /// Indexed like `QuorumLock::stores`; `None` = not asked or no answer in time
    replies: Vec<Option<error::Result<bool>>>,
    cancelled: bool,
}

impl Round {
    /// Stores that answered `true`
    fn accepted(&self) -> Vec<usize> {
        self.indices(|r| matches!(r, Some(Ok(true))))
    }

    /// Stores that answered `false`
    fn refused(&self) -> Vec<usize> {
        self.indices(|r| matches!(r, Some(Ok(false))))
    }

    fn indices(&self, pred: impl Fn(&Option<error::Result<bool>>) -> bool) -> Vec<usize> {
        self.replies
            .iter()
            .enumerate()
            .filter(|(_, r)| pred(r))
            .map(|(i, _)| i)
            .collect()
    }

    /// Take the error (or a timeout) recorded for `idx`
    fn take_error(&mut self, idx: usize) -> StoreError {
        match self.replies[idx].take() {
            Some(Err(e)) => e,
            _ => StoreError::Timeout,
        }
    }
}

/// Lease lock backed by a majority of independent stores
pub struct QuorumLock {
    stores: Vec<Arc<dyn StoreClient>>,
    clock: Arc<dyn Clock>,
    config: LockConfig,
}

impl QuorumLock {
    /// Build a lock over `stores` (ordered, ids unique, at least one)
    pub fn new(stores: Vec<Arc<dyn StoreClient>>, config: LockConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        if stores.is_empty() {
            return Err(ConfigError::NoStores);
        }

        let mut seen = HashSet::new();
        for store in &stores {
            if !seen.insert(store.id().to_string()) {
                return Err(ConfigError::DuplicateStore(store.id().to_string()));
            }
        }

        if stores.len() % 2 == 0 {
            tracing::warn!(
                stores = stores.len(),
                "even number of stores; an odd count tolerates the same failures with fewer stores"
            );
        }

        Ok(Self {
            stores,
            clock: Arc::new(SystemClock),
            config,
        })
    }

    /// Use `clock` for lease validity instead of the system clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Grants needed for a lease: strict majority
    pub fn majority(&self) -> usize {
        self.stores.len() / 2 + 1
    }

    /// Store failures that can be tolerated
    pub fn fault_tolerance(&self) -> usize {
        self.stores.len() - self.majority()
    }

    pub fn store_count(&self) -> usize {
        self.stores.len()
    }

    pub fn store_ids(&self) -> Vec<&str> {
        self.stores.iter().map(|s| s.id()).collect()
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Acquire with the configured TTL and budget
    pub fn acquire_default(&self, key: &str, cancel: &CancelToken) -> Result<LockHandle, AcquireError> {
        self.acquire(key, self.config.default_ttl, self.config.acquire_budget, cancel)
    }

    /// Map the handle's granted store ids to indices; unknown ids are returned apart
    fn resolve(&self, handle: &LockHandle) -> (Vec<usize>, Vec<String>) {
        let mut known = Vec::new();
        let mut unknown = Vec::new();
        for id in handle.granted_stores() {
            match self.stores.iter().position(|s| s.id() == id) {
                Some(idx) => known.push(idx),
                None => unknown.push(id.clone()),
            }
        }
        (known, unknown)
    }

    fn ids(&self, indices: &[usize]) -> Vec<String> {
        indices.iter().map(|&i| self.stores[i].id().to_string()).collect()
    }

    /// Run `op` against the `targets` stores concurrently and collect replies
    /// until all answered, `deadline` passed, or `cancel` fired.
    /// A store whose `true` reply arrives too late gets `undo` instead.
    fn fan_out<F, U>(
        &self,
        targets: &[usize],
        deadline: Instant,
        cancel: &CancelToken,
        op: F,
        undo: U,
    ) -> Round
    where
        F: Fn(&dyn StoreClient) -> error::Result<bool> + Send + Sync + 'static,
        U: Fn(&dyn StoreClient) + Send + Sync + 'static,
    {
        let op = Arc::new(op);
        let undo = Arc::new(undo);
        // Rendezvous: a reply is either taken by this call or refused
        let (tx, rx) = channel::bounded(0);

        for &idx in targets {
            let store = Arc::clone(&self.stores[idx]);
            let (op, undo) = (Arc::clone(&op), Arc::clone(&undo));
            let tx = tx.clone();
            thread::spawn(move || {
                let reply = (*op)(store.as_ref());
                if let Err(channel::SendError((_, Ok(true)))) = tx.send((idx, reply)) {
                    (*undo)(store.as_ref());
                }
            });
        }
        drop(tx);

        let mut round = Round {
            replies: (0..self.stores.len()).map(|_| None).collect(),
            cancelled: false,
        };
        let mut pending = targets.len();

        while pending > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            select! {
                recv(rx) -> msg => match msg {
                    Ok((idx, reply)) => {
                        tracing::trace!(store = self.stores[idx].id(), ?reply, "store replied");
                        round.replies[idx] = Some(reply);
                        pending -= 1;
                    }
                    Err(_) => break,
                },
                recv(cancel.signal()) -> _ => {
                    round.cancelled = true;
                    break;
                }
                default(remaining) => break,
            }
        }

        round
    }

    /// Best-effort token-matched delete on `targets`
    fn cleanup(&self, targets: &[usize], key: &str, token: &LockToken) {
        if targets.is_empty() {
            return;
        }

        let (k, t) = (key.to_string(), token.as_str().to_string());
        let round = self.fan_out(
            targets,
            Instant::now() + self.config.store_timeout,
            &CancelToken::new(),
            move |store| store.delete_if_equals(&k, &t),
            |_| {},
        );

        let missed = targets.iter().filter(|&&i| round.replies[i].is_none()).count();
        tracing::debug!(key, targets = targets.len(), missed, "cleaned up partial grants");
    }
}

impl LeaseLock for QuorumLock {
    fn acquire(
        &self,
        key: &str,
        ttl: Duration,
        budget: Duration,
        cancel: &CancelToken,
    ) -> Result<LockHandle, AcquireError> {
        validate_request(key, ttl, self.clock.now())?;
        if cancel.is_cancelled() {
            return Err(AcquireError::Cancelled);
        }

        let token = LockToken::generate();
        let t0 = self.clock.now();
        let deadline = Instant::now() + self.config.store_timeout.min(budget);

        let all: Vec<usize> = (0..self.stores.len()).collect();
        let (k, v) = (key.to_string(), token.as_str().to_string());
        let (uk, uv) = (k.clone(), v.clone());
        let round = self.fan_out(
            &all,
            deadline,
            cancel,
            move |store| store.set_if_absent(&k, &v, ttl),
            move |store| {
                if let Err(e) = store.delete_if_equals(&uk, &uv) {
                    tracing::debug!(store = store.id(), key = %uk, error = %e, "late grant left to expire");
                }
            },
        );

        let granted = round.accepted();
        let refused = round.refused();
        // Errors and silent stores; a silent store may still apply the write
        let unanswered: Vec<usize> = all
            .iter()
            .copied()
            .filter(|i| !granted.contains(i) && !refused.contains(i))
            .collect();

        if round.cancelled {
            tracing::debug!(key, granted = granted.len(), "acquire cancelled, releasing partial grants");
            self.cleanup(&[granted, unanswered].concat(), key, &token);
            return Err(AcquireError::Cancelled);
        }

        let elapsed = self.clock.elapsed_since(t0);
        let drift = self.config.drift_for(ttl);
        let required = self.majority();

        if granted.len() >= required && ttl > elapsed + drift {
            let validity = ttl - elapsed - drift;
            tracing::debug!(
                key,
                granted = granted.len(),
                stores = self.stores.len(),
                ?validity,
                "quorum lock acquired"
            );
            return Ok(LockHandle::new(
                key,
                token,
                self.ids(&granted),
                t0 + elapsed,
                validity,
            ));
        }

        for &idx in &unanswered {
            tracing::warn!(store = self.stores[idx].id(), key, "store did not grant: unavailable or too slow");
        }
        tracing::debug!(
            key,
            granted = granted.len(),
            required,
            ?elapsed,
            "quorum not reached in time"
        );

        let unavailable = unanswered.len();
        let granted_count = granted.len();
        self.cleanup(&[granted, unanswered].concat(), key, &token);

        Err(AcquireError::Timeout {
            granted: granted_count,
            required,
            unavailable,
        })
    }

    fn release(&self, handle: &LockHandle) -> Result<ReleaseOutcome, ReleaseError> {
        let (targets, unknown) = self.resolve(handle);
        if targets.is_empty() {
            return Err(ReleaseError::ForeignHandle(handle.key().to_string()));
        }

        if !handle.begin_release(self.clock.now()) {
            tracing::warn!(key = handle.key(), "release of a lease that is no longer held");
            return Ok(ReleaseOutcome::AlreadyExpired);
        }

        let (k, t) = (handle.key().to_string(), handle.token().as_str().to_string());
        let mut round = self.fan_out(
            &targets,
            Instant::now() + self.config.store_timeout,
            &CancelToken::new(),
            move |store| store.delete_if_equals(&k, &t),
            |_| {},
        );

        let released = round.accepted();
        let skipped = round.refused();
        let unreached: Vec<usize> = targets
            .iter()
            .copied()
            .filter(|i| !released.contains(i) && !skipped.contains(i))
            .collect();

        if released.is_empty() && skipped.is_empty() {
            handle.abort_release();
            let first = unreached[0];
            return Err(ReleaseError::StoreUnavailable {
                store: self.stores[first].id().to_string(),
                source: round.take_error(first),
            });
        }

        let outcome = if !unreached.is_empty() || !unknown.is_empty() {
            let mut ids = self.ids(&unreached);
            ids.extend(unknown);
            tracing::warn!(key = handle.key(), unreached = ?ids, "partial release, remaining grants expire by ttl");
            ReleaseOutcome::ReleasedPartial { unreached: ids }
        } else if released.is_empty() {
            tracing::warn!(key = handle.key(), "lease expired before release, token no longer stored");
            ReleaseOutcome::AlreadyExpired
        } else {
            ReleaseOutcome::Released
        };

        handle.finish_release(&outcome);
        tracing::debug!(key = handle.key(), released = released.len(), skipped = skipped.len(), "quorum lock released");
        Ok(outcome)
    }

    fn extend(&self, handle: &LockHandle, ttl: Duration) -> Result<LockHandle, ExtendError> {
        if !ttl_fits(ttl, self.clock.now()) {
            return Err(ExtendError::InvalidTtl(ttl));
        }
        let (targets, _) = self.resolve(handle);
        if targets.is_empty() {
            return Err(ExtendError::ForeignHandle(handle.key().to_string()));
        }

        let t0 = self.clock.now();
        if handle.state(t0) != HandleState::Held {
            return Err(ExtendError::Lost(handle.key().to_string()));
        }

        let (k, t) = (handle.key().to_string(), handle.token().as_str().to_string());
        let mut round = self.fan_out(
            &targets,
            Instant::now() + self.config.store_timeout,
            &CancelToken::new(),
            move |store| store.expire_if_equals(&k, &t, ttl),
            |_| {},
        );

        let extended = round.accepted();
        let refused = round.refused();
        let elapsed = self.clock.elapsed_since(t0);
        let drift = self.config.drift_for(ttl);
        let required = self.majority();

        if extended.len() >= required && ttl > elapsed + drift && handle.supersede() {
            tracing::debug!(key = handle.key(), extended = extended.len(), ?ttl, "lease extended");
            return Ok(LockHandle::new(
                handle.key(),
                handle.token().clone(),
                self.ids(&extended),
                t0 + elapsed,
                ttl - elapsed - drift,
            ));
        }

        let failed: Vec<usize> = targets
            .iter()
            .copied()
            .filter(|i| !extended.contains(i) && !refused.contains(i))
            .collect();

        // Only blame the stores if they could have made up the shortfall
        if !failed.is_empty() && extended.len() + failed.len() >= required {
            let first = failed[0];
            return Err(ExtendError::StoreUnavailable {
                store: self.stores[first].id().to_string(),
                source: round.take_error(first),
            });
        }

        Err(ExtendError::Lost(handle.key().to_string()))
    }
}
