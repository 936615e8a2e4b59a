//! Single-instance lock
//!
//! The "simple but imperfect" lease: one store, one key, poll until
//! `set_if_absent` succeeds. If the store goes down the lock is unavailable;
//! there is no failover.
//!
//! Each `set_if_absent` runs on a detached thread and is awaited for at most
//! `min(store_timeout, remaining budget)`, so a slow store never holds the
//! caller past its budget or a cancellation. A grant that arrives after the
//! caller stopped listening is deleted again by that thread.

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

/// How one `set_if_absent` attempt ended, as seen by the caller
enum Attempt {
    Reply(error::Result<bool>),
    TimedOut,
    Cancelled,
}

/// Lease lock backed by exactly one store
pub struct SingleInstanceLock {
    store: Arc<dyn StoreClient>,
    clock: Arc<dyn Clock>,
    config: LockConfig,
}

impl SingleInstanceLock {
    pub fn new(store: Arc<dyn StoreClient>, config: LockConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            store,
            clock: Arc::new(SystemClock),
            config,
        })
    }

    /// Use `clock` for lease validity instead of the system clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Delay between `set_if_absent` attempts
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.config.poll_interval = interval;
        }
        self
    }

    pub fn store_id(&self) -> &str {
        self.store.id()
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Acquire with the configured TTL and budget
    pub fn acquire_default(&self, key: &str, cancel: &CancelToken) -> Result<LockHandle, AcquireError> {
        self.acquire(key, self.config.default_ttl, self.config.acquire_budget, cancel)
    }

    /// Undo a write the store may have applied before the call failed
    fn cleanup(&self, key: &str, token: &LockToken) {
        if let Err(e) = self.store.delete_if_equals(key, token.as_str()) {
            tracing::debug!(store = self.store.id(), key, error = %e, "cleanup failed, lease will expire");
        }
    }

    /// One `set_if_absent`, awaited for at most `wait`
    fn try_set(
        &self,
        key: &str,
        token: &LockToken,
        ttl: Duration,
        wait: Duration,
        cancel: &CancelToken,
    ) -> Attempt {
        // Rendezvous: a reply is either taken by the caller or refused
        let (tx, rx) = channel::bounded(0);
        let store = Arc::clone(&self.store);
        let (k, v) = (key.to_string(), token.as_str().to_string());

        thread::spawn(move || {
            let reply = store.set_if_absent(&k, &v, ttl);
            if let Err(channel::SendError(Ok(true))) = tx.send(reply) {
                match store.delete_if_equals(&k, &v) {
                    Ok(_) => tracing::debug!(store = store.id(), key = %k, "withdrew late grant"),
                    Err(e) => {
                        tracing::debug!(store = store.id(), key = %k, error = %e, "late grant left to expire")
                    }
                }
            }
        });

        select! {
            recv(rx) -> msg => match msg {
                Ok(reply) => Attempt::Reply(reply),
                Err(_) => Attempt::Reply(Err(StoreError::Unavailable("store call aborted".into()))),
            },
            recv(cancel.signal()) -> _ => Attempt::Cancelled,
            default(wait) => Attempt::TimedOut,
        }
    }
}

impl LeaseLock for SingleInstanceLock {
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
        let started = Instant::now();
        let mut polls = 0u32;

        loop {
            let attempt_at = self.clock.now();
            let wait = self.config.store_timeout.min(budget.saturating_sub(started.elapsed()));
            polls += 1;

            match self.try_set(key, &token, ttl, wait, cancel) {
                Attempt::Reply(Ok(true)) => {
                    if cancel.is_cancelled() {
                        self.cleanup(key, &token);
                        return Err(AcquireError::Cancelled);
                    }
                    tracing::debug!(store = self.store.id(), key, polls, "lock acquired");
                    return Ok(LockHandle::new(
                        key,
                        token,
                        vec![self.store.id().to_string()],
                        attempt_at,
                        ttl,
                    ));
                }
                Attempt::Reply(Ok(false)) => {}
                Attempt::Reply(Err(source)) => {
                    tracing::warn!(store = self.store.id(), key, error = %source, "store unavailable during acquire");
                    self.cleanup(key, &token);
                    return Err(AcquireError::StoreUnavailable {
                        store: self.store.id().to_string(),
                        source,
                    });
                }
                Attempt::Cancelled => {
                    tracing::debug!(key, polls, "acquire cancelled while a store call was in flight");
                    return Err(AcquireError::Cancelled);
                }
                Attempt::TimedOut if started.elapsed() >= budget => {
                    tracing::debug!(key, polls, "acquire budget exhausted waiting for the store");
                    return Err(AcquireError::Timeout {
                        granted: 0,
                        required: 1,
                        unavailable: 1,
                    });
                }
                Attempt::TimedOut => {
                    tracing::warn!(store = self.store.id(), key, "store call timed out during acquire");
                    return Err(AcquireError::StoreUnavailable {
                        store: self.store.id().to_string(),
                        source: StoreError::Timeout,
                    });
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= budget {
                tracing::debug!(key, polls, "acquire budget exhausted");
                return Err(AcquireError::Timeout {
                    granted: 0,
                    required: 1,
                    unavailable: 0,
                });
            }

            if cancel.wait(self.config.poll_interval.min(budget - elapsed)) {
                return Err(AcquireError::Cancelled);
            }
        }
    }

    fn release(&self, handle: &LockHandle) -> Result<ReleaseOutcome, ReleaseError> {
        if !handle.is_granted_by(self.store.id()) {
            return Err(ReleaseError::ForeignHandle(handle.key().to_string()));
        }

        if !handle.begin_release(self.clock.now()) {
            tracing::warn!(key = handle.key(), "release of a lease that is no longer held");
            return Ok(ReleaseOutcome::AlreadyExpired);
        }

        let outcome = match self.store.delete_if_equals(handle.key(), handle.token().as_str()) {
            Ok(true) => ReleaseOutcome::Released,
            Ok(false) => {
                tracing::warn!(key = handle.key(), "lease expired before release, token no longer stored");
                ReleaseOutcome::AlreadyExpired
            }
            Err(source) => {
                handle.abort_release();
                return Err(ReleaseError::StoreUnavailable {
                    store: self.store.id().to_string(),
                    source,
                });
            }
        };

        handle.finish_release(&outcome);
        tracing::debug!(key = handle.key(), ?outcome, "lock released");
        Ok(outcome)
    }

    fn extend(&self, handle: &LockHandle, ttl: Duration) -> Result<LockHandle, ExtendError> {
        if !ttl_fits(ttl, self.clock.now()) {
            return Err(ExtendError::InvalidTtl(ttl));
        }
        if !handle.is_granted_by(self.store.id()) {
            return Err(ExtendError::ForeignHandle(handle.key().to_string()));
        }

        let started = self.clock.now();
        if handle.state(started) != HandleState::Held {
            return Err(ExtendError::Lost(handle.key().to_string()));
        }

        match self.store.expire_if_equals(handle.key(), handle.token().as_str(), ttl) {
            Ok(true) if handle.supersede() => {
                tracing::debug!(key = handle.key(), ?ttl, "lease extended");
                Ok(LockHandle::new(
                    handle.key(),
                    handle.token().clone(),
                    handle.granted_stores().to_vec(),
                    started,
                    ttl,
                ))
            }
            Ok(_) => Err(ExtendError::Lost(handle.key().to_string())),
            Err(source) => Err(ExtendError::StoreUnavailable {
                store: self.store.id().to_string(),
                source,
            }),
        }
    }
}
