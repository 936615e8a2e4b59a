//! Lock handles
//!
//! ## Lifecycle
//! ```text
//!                 ┌──────────► Released
//!   acquire ──► Held ───────► ReleasedPartial
//!                 ├──────────► Expired      (deadline passed / token gone)
//!                 └──────────► Superseded   (replaced by an extended handle)
//! ```
//! Only a `Held` handle, inside its deadline, ever causes store writes.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use super::LockToken;

const HELD: u8 = 0;
const RELEASING: u8 = 1;
const RELEASED: u8 = 2;
const RELEASED_PARTIAL: u8 = 3;
const EXPIRED: u8 = 4;
const SUPERSEDED: u8 = 5;

/// Observable state of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Held,
    Released,
    ReleasedPartial,
    Expired,
    Superseded,
}

/// What a release achieved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Every reachable granting store dropped the token
    Released,

    /// The lease had already lapsed or was re-granted; nothing was deleted.
    /// The critical section may have overlapped another holder.
    AlreadyExpired,

    /// Some granting stores could not be reached and keep the token until TTL
    ReleasedPartial { unreached: Vec<String> },
}

/// Proof of a successful acquisition
#[derive(Debug)]
pub struct LockHandle {
    key: String,
    token: LockToken,
    granted: Vec<String>,
    acquired_at: Instant,
    validity: Duration,
    deadline: Instant,
    state: AtomicU8,
}

impl LockHandle {
    pub(crate) fn new(
        key: &str,
        token: LockToken,
        granted: Vec<String>,
        acquired_at: Instant,
        validity: Duration,
    ) -> Self {
        Self {
            key: key.to_string(),
            token,
            granted,
            acquired_at,
            validity,
            // Unrepresentable deadline: treat the lease as already lapsed
            deadline: acquired_at.checked_add(validity).unwrap_or(acquired_at),
            state: AtomicU8::new(HELD),
        }
    }

    /// Contended resource
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &LockToken {
        &self.token
    }

    /// Ids of the stores that accepted the token
    pub fn granted_stores(&self) -> &[String] {
        &self.granted
    }

    pub fn is_granted_by(&self, store_id: &str) -> bool {
        self.granted.iter().any(|id| id == store_id)
    }

    /// Clock reading the validity window starts from
    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    /// Usable lease length as computed at acquisition
    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Instant after which the lease must be assumed lost
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Validity left at `now`
    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }

    /// State as seen at `now`
    pub fn state(&self, now: Instant) -> HandleState {
        match self.state.load(Ordering::SeqCst) {
            HELD | RELEASING if now > self.deadline => HandleState::Expired,
            HELD | RELEASING => HandleState::Held,
            RELEASED => HandleState::Released,
            RELEASED_PARTIAL => HandleState::ReleasedPartial,
            SUPERSEDED => HandleState::Superseded,
            _ => HandleState::Expired,
        }
    }

    /// Claim the handle for release. Fails if it is no longer held at `now`;
    /// a handle past its deadline is marked expired.
    pub(crate) fn begin_release(&self, now: Instant) -> bool {
        if now > self.deadline {
            let _ = self
                .state
                .compare_exchange(HELD, EXPIRED, Ordering::SeqCst, Ordering::SeqCst);
            return false;
        }
        self.state
            .compare_exchange(HELD, RELEASING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Hand the handle back after a release that touched no store
    pub(crate) fn abort_release(&self) {
        let _ = self
            .state
            .compare_exchange(RELEASING, HELD, Ordering::SeqCst, Ordering::SeqCst);
    }

    /// Record how a claimed release ended
    pub(crate) fn finish_release(&self, outcome: &ReleaseOutcome) {
        let state = match outcome {
            ReleaseOutcome::Released => RELEASED,
            ReleaseOutcome::ReleasedPartial { .. } => RELEASED_PARTIAL,
            ReleaseOutcome::AlreadyExpired => EXPIRED,
        };
        self.state.store(state, Ordering::SeqCst);
    }

    /// Retire a held handle in favour of an extended one
    pub(crate) fn supersede(&self) -> bool {
        self.state
            .compare_exchange(HELD, SUPERSEDED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}
