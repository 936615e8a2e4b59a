//! # quorumlock
//!
//! Lease-based distributed mutual exclusion. Competing processes never talk
//! to each other; they coordinate only through one or more key-value stores.
//! - Single-instance lock: one store, token-checked release
//! - Quorum lock: majority of N independent stores within a time budget
//! - Tokens fence every release and extension
//! - TCP lease-store server and client for multi-process use
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Caller (critical section)                    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ acquire / release / extend
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │        SingleInstanceLock        │        QuorumLock         │
//! │         (poll one store)         │  (fan out, majority, Δt)  │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ StoreClient
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ MemoryStore │          │  TcpStore   │──► network::Server
//!   │ (in-proc)   │          │  (framed)   │      (MemoryStore)
//!   └─────────────┘          └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod clock;
pub mod store;
pub mod lock;
pub mod protocol;
pub mod network;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{AcquireError, ConfigError, ExtendError, LockError, ReleaseError, StoreError};
pub use config::{LockConfig, ServerConfig};
pub use clock::{Clock, ManualClock, SystemClock};
pub use store::{MemoryStore, StoreClient, TcpStore};
pub use lock::{
    CancelToken, Guarded, HandleState, LeaseLock, LockHandle, LockToken, QuorumLock,
    ReleaseOutcome, RetryPolicy, SingleInstanceLock,
};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of quorumlock
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
