//! Lock Module
//!
//! Lease-based mutual exclusion over one or more stores.
//!
//! ## Flavours
//! - [`SingleInstanceLock`]: one store, polls `set_if_absent` until granted.
//!   Simple; the store is a single point of failure.
//! - [`QuorumLock`]: N independent stores, a majority must grant within the
//!   budget and the remaining validity must stay positive after subtracting
//!   the time spent and a clock drift margin.
//!
//! ## Protocol
//! ```text
//!   acquire ──► set_if_absent(key, token, ttl) on every store
//!          ──► LockHandle { token, granted stores, deadline }
//!   critical section
//!   release ──► delete_if_equals(key, token) on the granted stores only
//! ```
//! Nothing ever deletes a key without checking the token.

mod cancel;
mod handle;
mod quorum;
mod retry;
mod single;
mod token;

use std::time::{Duration, Instant};

use crate::error::{AcquireError, ExtendError, LockError, ReleaseError};

pub use cancel::CancelToken;
pub use handle::{HandleState, LockHandle, ReleaseOutcome};
pub use quorum::QuorumLock;
pub use retry::RetryPolicy;
pub use single::SingleInstanceLock;
pub use token::LockToken;

/// Result of [`LeaseLock::with_lock`]
#[derive(Debug)]
pub struct Guarded<T> {
    /// What the critical section returned
    pub value: T,

    /// How the lease ended. `value` is kept even when the release failed;
    /// the lease then lapses by its TTL.
    pub outcome: Result<ReleaseOutcome, ReleaseError>,
}

impl<T> Guarded<T> {
    /// The lease lapsed before release; `value` may have been computed
    /// concurrently with another holder
    pub fn is_suspect(&self) -> bool {
        matches!(self.outcome, Ok(ReleaseOutcome::AlreadyExpired))
    }

    /// Split into the value and the release outcome, failing on a release error
    pub fn into_parts(self) -> Result<(T, ReleaseOutcome), LockError> {
        let outcome = self.outcome?;
        Ok((self.value, outcome))
    }
}

/// Common interface of both lock flavours
pub trait LeaseLock: Send + Sync {
    /// Try to obtain the lease on `key` for `ttl`, giving up after `budget`
    fn acquire(
        &self,
        key: &str,
        ttl: Duration,
        budget: Duration,
        cancel: &CancelToken,
    ) -> Result<LockHandle, AcquireError>;

    /// Give the lease back. Never deletes a key holding another token.
    fn release(&self, handle: &LockHandle) -> Result<ReleaseOutcome, ReleaseError>;

    /// Re-arm a held lease for `ttl` from now, keeping its token.
    /// On success `handle` is superseded by the returned one.
    fn extend(&self, handle: &LockHandle, ttl: Duration) -> Result<LockHandle, ExtendError>;

    /// [`acquire`](Self::acquire), retrying timeouts with randomized backoff
    fn acquire_with_retry(
        &self,
        key: &str,
        ttl: Duration,
        budget: Duration,
        policy: &RetryPolicy,
        cancel: &CancelToken,
    ) -> Result<LockHandle, AcquireError> {
        let mut attempt = 1;
        loop {
            match self.acquire(key, ttl, budget, cancel) {
                Err(AcquireError::Timeout { .. }) if attempt < policy.attempts => {
                    let delay = policy.backoff();
                    tracing::debug!(key, attempt, ?delay, "acquire timed out, backing off");
                    if cancel.wait(delay) {
                        return Err(AcquireError::Cancelled);
                    }
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Acquire, run `f`, then release whatever happened in `f`.
    /// Only a failed acquire is an `Err`; a failed release is reported in
    /// [`Guarded::outcome`] next to the value.
    fn with_lock<T, F>(
        &self,
        key: &str,
        ttl: Duration,
        budget: Duration,
        cancel: &CancelToken,
        f: F,
    ) -> Result<Guarded<T>, LockError>
    where
        Self: Sized,
        F: FnOnce(&LockHandle) -> T,
    {
        let handle = self.acquire(key, ttl, budget, cancel)?;
        let value = f(&handle);
        let outcome = self.release(&handle);
        if let Err(e) = &outcome {
            tracing::warn!(key, error = %e, "release after critical section failed");
        }
        Ok(Guarded { value, outcome })
    }
}

/// Reject requests that can never produce a valid lease
pub(crate) fn validate_request(key: &str, ttl: Duration, now: Instant) -> Result<(), AcquireError> {
    if key.is_empty() {
        return Err(AcquireError::InvalidKey);
    }
    if !ttl_fits(ttl, now) {
        return Err(AcquireError::InvalidTtl(ttl));
    }
    Ok(())
}

/// A lease of `ttl` starting at `now` is non-empty and its deadline is representable
pub(crate) fn ttl_fits(ttl: Duration, now: Instant) -> bool {
    !ttl.is_zero() && now.checked_add(ttl).is_some()
}
