//! Store Module
//!
//! The key-value store contract the locks coordinate through.
//!
//! ## Contract
//! Every operation is atomic at the store:
//! - `set_if_absent(key, value, ttl)`: write only if the key is missing or expired
//! - `get(key)`: current live value, if any
//! - `delete_if_equals(key, value)`: remove only if the stored value matches
//! - `expire_if_equals(key, value, ttl)`: re-arm the TTL only if the value matches
//!
//! Transport failures are reported as [`StoreError`](crate::StoreError),
//! never as "key absent".
//!
//! ## Implementations
//! - [`MemoryStore`]: in-process store with TTLs and fault injection
//! - [`TcpStore`]: client for a store served by [`crate::network::Server`]

mod memory;
mod tcp;

use std::time::Duration;

use crate::error::Result;

pub use memory::MemoryStore;
pub use tcp::TcpStore;

/// One key-value store instance
pub trait StoreClient: Send + Sync {
    /// Stable identifier, unique within a quorum
    fn id(&self) -> &str;

    /// Store `value` under `key` for `ttl` unless a live value exists.
    /// Returns whether the write happened.
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Current live value of `key`
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Delete `key` only if it currently holds `expected`.
    /// Returns whether the key was deleted.
    fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool>;

    /// Reset the TTL of `key` to `ttl` only if it currently holds `expected`.
    /// Returns whether the TTL was updated.
    fn expire_if_equals(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool>;

    /// Health check
    fn ping(&self) -> Result<()> {
        self.get("").map(|_| ())
    }
}
