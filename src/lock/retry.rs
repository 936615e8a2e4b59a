//! Retry policy for contended acquisitions
//!
//! Randomized backoff between attempts so competitors that failed together do
//! not retry in lockstep.

use std::time::Duration;

use rand::Rng;

/// How often and how patiently to retry a timed-out acquisition
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,

    /// Fixed delay between attempts
    pub base_delay: Duration,

    /// Upper bound of the random delay added to `base_delay`
    pub max_jitter: Duration,
}

impl RetryPolicy {
    /// Single attempt, no waiting
    pub fn none() -> Self {
        Self {
            attempts: 1,
            base_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    /// Delay before the next attempt
    pub fn backoff(&self) -> Duration {
        let jitter_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        if jitter_ms == 0 {
            return self.base_delay;
        }
        let extra = rand::thread_rng().gen_range(0..jitter_ms);
        self.base_delay + Duration::from_millis(extra)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(200),
            max_jitter: Duration::from_millis(100),
        }
    }
}
