//! Error types for quorumlock
//!
//! One error enum per boundary:
//! - [`StoreError`]: a single store call failed (transport, protocol)
//! - [`AcquireError`] / [`ReleaseError`] / [`ExtendError`]: lock operations
//! - [`LockError`]: umbrella used by `with_lock`
//! - [`ConfigError`]: building a lock from invalid settings

use std::time::Duration;

use thiserror::Error;

/// Result type alias for store-level calls
pub type Result<T> = std::result::Result<T, StoreError>;

/// Failure talking to one store instance
///
/// Never used to mean "key absent"; absence is `Ok(None)` / `Ok(false)`.
#[derive(Debug, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // Transport Errors
    // -------------------------------------------------------------------------
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call timed out")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Protocol Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The store understood the request but refused it
    #[error("store rejected request: {0}")]
    Rejected(String),
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Why an acquisition did not produce a handle
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("lock key must not be empty")]
    InvalidKey,

    #[error("lease ttl must be positive and fit the clock range, got {0:?}")]
    InvalidTtl(Duration),

    /// Budget exhausted, or the majority was not reached in time
    #[error("acquire timed out: {granted}/{required} grants ({unavailable} stores unavailable)")]
    Timeout {
        granted: usize,
        required: usize,
        unavailable: usize,
    },

    #[error("store {store} unavailable: {source}")]
    StoreUnavailable {
        store: String,
        #[source]
        source: StoreError,
    },

    #[error("acquire cancelled")]
    Cancelled,
}

impl AcquireError {
    /// True when the attempt may succeed if simply retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AcquireError::Timeout { .. } | AcquireError::StoreUnavailable { .. }
        )
    }

    /// True when a quorum failed because too many stores were unreachable,
    /// rather than because competitors held the key
    pub fn is_store_outage(&self) -> bool {
        match self {
            AcquireError::Timeout {
                granted,
                required,
                unavailable,
            } => granted + unavailable >= *required && *unavailable > 0,
            AcquireError::StoreUnavailable { .. } => true,
            _ => false,
        }
    }
}

/// Release could not be carried out at all
#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("store {store} unavailable during release: {source}")]
    StoreUnavailable {
        store: String,
        #[source]
        source: StoreError,
    },

    /// The handle was granted by stores this lock does not manage
    #[error("handle for key {0:?} was not granted by this lock")]
    ForeignHandle(String),
}

/// Why a lease could not be extended
#[derive(Debug, Error)]
pub enum ExtendError {
    #[error("lease ttl must be positive and fit the clock range, got {0:?}")]
    InvalidTtl(Duration),

    /// The lease expired or was taken over; the critical section must stop
    #[error("lease on key {0:?} is no longer held")]
    Lost(String),

    #[error("store {store} unavailable during extend: {source}")]
    StoreUnavailable {
        store: String,
        #[source]
        source: StoreError,
    },

    #[error("handle for key {0:?} was not granted by this lock")]
    ForeignHandle(String),
}

/// Umbrella error for `with_lock`
#[derive(Debug, Error)]
pub enum LockError {
    #[error(transparent)]
    Acquire(#[from] AcquireError),

    #[error(transparent)]
    Release(#[from] ReleaseError),
}

/// Invalid lock construction parameters
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("a quorum lock needs at least one store")]
    NoStores,

    #[error("duplicate store id: {0}")]
    DuplicateStore(String),

    #[error("Configuration error: {0}")]
    Invalid(String),
}
