//! In-memory store
//!
//! HashMap of leased values behind a parking_lot Mutex.
//!
//! ## Expiry
//! Entries carry an absolute deadline taken from the store's [`Clock`].
//! Expired entries are treated as absent by every operation and removed
//! lazily when touched (or in bulk by [`MemoryStore::purge_expired`]).
//!
//! ## Fault Injection
//! [`MemoryStore::set_available`] and [`MemoryStore::set_latency`] let tests
//! simulate a store that is down or slow.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::error::{Result, StoreError};

use super::StoreClient;

/// A stored value and the instant it stops being visible
#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process lease store
pub struct MemoryStore {
    id: String,

    /// Live and not-yet-purged entries
    entries: Mutex<HashMap<String, Entry>>,

    /// Time source for TTLs
    clock: Arc<dyn Clock>,

    /// When false every call fails with `StoreError::Unavailable`
    available: AtomicBool,

    /// Artificial delay applied before each call
    latency: Mutex<Duration>,
}

impl MemoryStore {
    /// Create an empty store using the system clock
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_clock(id, Arc::new(SystemClock))
    }

    /// Create an empty store reading time from `clock`
    pub fn with_clock(id: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            id: id.into(),
            entries: Mutex::new(HashMap::new()),
            clock,
            available: AtomicBool::new(true),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    /// Simulate the store going down (`false`) or coming back (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delay every subsequent call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .lock()
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    /// Check if no live entries exist
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining lease of `key`, if live
    pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now();
        self.entries
            .lock()
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.expires_at - now)
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    /// Apply injected faults before touching state
    fn check_faults(&self) -> Result<()> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            thread::sleep(latency);
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("{} is down", self.id)));
        }
        Ok(())
    }

    /// Run `f` on the live entry for `key` (expired entries are removed first)
    fn with_live_entry<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut HashMap<String, Entry>, Option<&Entry>, Instant) -> T,
    ) -> T {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|e| e.expires_at <= now) {
            entries.remove(key);
        }
        let current = entries.get(key).cloned();
        f(&mut entries, current.as_ref(), now)
    }
}

impl StoreClient for MemoryStore {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.check_faults()?;
        if ttl.is_zero() {
            return Err(StoreError::Rejected("ttl must be positive".into()));
        }
        let written = self
            .with_live_entry(key, |entries, current, now| {
                if current.is_some() {
                    return Some(false);
                }
                let expires_at = now.checked_add(ttl)?;
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: value.to_string(),
                        expires_at,
                    },
                );
                Some(true)
            })
            .ok_or_else(ttl_out_of_range)?;
        tracing::trace!(store = %self.id, key, written, "set_if_absent");
        Ok(written)
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_faults()?;
        Ok(self.with_live_entry(key, |_, current, _| current.map(|e| e.value.clone())))
    }

    fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool> {
        self.check_faults()?;
        let deleted = self.with_live_entry(key, |entries, current, _| match current {
            Some(entry) if entry.value == expected => {
                entries.remove(key);
                true
            }
            _ => false,
        });
        tracing::trace!(store = %self.id, key, deleted, "delete_if_equals");
        Ok(deleted)
    }

    fn expire_if_equals(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool> {
        self.check_faults()?;
        if ttl.is_zero() {
            return Err(StoreError::Rejected("ttl must be positive".into()));
        }
        self.with_live_entry(key, |entries, current, now| match current {
            Some(entry) if entry.value == expected => {
                let expires_at = now.checked_add(ttl)?;
                if let Some(slot) = entries.get_mut(key) {
                    slot.expires_at = expires_at;
                }
                Some(true)
            }
            _ => Some(false),
        })
        .ok_or_else(ttl_out_of_range)
    }

    fn ping(&self) -> Result<()> {
        self.check_faults()
    }
}

fn ttl_out_of_range() -> StoreError {
    StoreError::Rejected("ttl exceeds the clock range".into())
}
