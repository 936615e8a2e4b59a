//! QuorumLock Tests
//!
//! Tests verify:
//! - Majority arithmetic and construction checks
//! - Acquisition with up to N - majority stores down
//! - No handle (and no leftover grants) when the majority is unreachable
//! - Validity window shrinks by elapsed time and drift
//! - Release outcomes: Released, AlreadyExpired, ReleasedPartial
//! - Split votes, cancellation, retry and extension

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use quorumlock::{
    AcquireError, CancelToken, Clock, ConfigError, ExtendError, HandleState, LeaseLock,
    LockConfig, ManualClock, MemoryStore, QuorumLock, ReleaseError, ReleaseOutcome, RetryPolicy,
    StoreClient,
};

// =============================================================================
// Helper Functions
// =============================================================================

struct Cluster {
    clock: Arc<ManualClock>,
    stores: Vec<Arc<MemoryStore>>,
    lock: QuorumLock,
}

fn config() -> LockConfig {
    LockConfig::builder()
        .store_timeout(Duration::from_millis(100))
        .build()
}

fn cluster(n: usize) -> Cluster {
    let clock = Arc::new(ManualClock::new());
    let stores: Vec<Arc<MemoryStore>> = (0..n)
        .map(|i| Arc::new(MemoryStore::with_clock(format!("redis-{}", i), clock.clone())))
        .collect();
    let lock = quorum_over(&stores).with_clock(clock.clone());
    Cluster {
        clock,
        stores,
        lock,
    }
}

fn quorum_over(stores: &[Arc<MemoryStore>]) -> QuorumLock {
    let clients: Vec<Arc<dyn StoreClient>> = stores
        .iter()
        .map(|s| s.clone() as Arc<dyn StoreClient>)
        .collect();
    QuorumLock::new(clients, config()).unwrap()
}

fn holders(stores: &[Arc<MemoryStore>], key: &str) -> Vec<Option<String>> {
    stores.iter().map(|s| s.get(key).unwrap()).collect()
}

const TTL: Duration = Duration::from_secs(30);
const BUDGET: Duration = Duration::from_secs(1);

// =============================================================================
// Construction Tests
// =============================================================================

#[test]
fn test_majority_arithmetic() {
    for (n, majority, tolerance) in [(1, 1, 0), (2, 2, 0), (3, 2, 1), (4, 3, 1), (5, 3, 2)] {
        let c = cluster(n);
        assert_eq!(c.lock.majority(), majority, "n = {}", n);
        assert_eq!(c.lock.fault_tolerance(), tolerance, "n = {}", n);
    }
}

#[test]
fn test_no_stores_rejected() {
    assert!(matches!(
        QuorumLock::new(Vec::new(), config()),
        Err(ConfigError::NoStores)
    ));
}

#[test]
fn test_duplicate_store_ids_rejected() {
    let stores: Vec<Arc<dyn StoreClient>> = vec![
        Arc::new(MemoryStore::new("redis-0")),
        Arc::new(MemoryStore::new("redis-0")),
    ];
    assert!(matches!(
        QuorumLock::new(stores, config()),
        Err(ConfigError::DuplicateStore(_))
    ));
}

// =============================================================================
// Acquisition Tests
// =============================================================================

#[test]
fn test_acquire_on_all_stores() {
    let c = cluster(3);

    let handle = c.lock.acquire("stock-lock", TTL, BUDGET, &CancelToken::new()).unwrap();

    assert_eq!(handle.granted_stores().len(), 3);
    for holder in holders(&c.stores, "stock-lock") {
        assert_eq!(holder, Some(handle.token().to_string()));
    }
}

#[test]
fn test_one_store_down_still_acquires() {
    // TTL 30s, budget 1s, 3 stores, 1 down
    let c = cluster(3);
    c.stores[2].set_available(false);

    let handle = c.lock.acquire("stock-lock", TTL, BUDGET, &CancelToken::new()).unwrap();
    assert_eq!(
        handle.granted_stores(),
        &["redis-0".to_string(), "redis-1".to_string()]
    );

    // Business code runs for 5s
    c.clock.advance(Duration::from_secs(5));

    assert_eq!(c.lock.release(&handle).unwrap(), ReleaseOutcome::Released);
    assert_eq!(holders(&c.stores[..2], "stock-lock"), vec![None, None]);
}

#[test]
fn test_tolerates_n_minus_majority_failures() {
    let c = cluster(5);
    c.stores[0].set_available(false);
    c.stores[3].set_available(false);

    let handle = c.lock.acquire("stock-lock", TTL, BUDGET, &CancelToken::new()).unwrap();
    assert!(handle.granted_stores().len() >= c.lock.majority());
    assert!(!handle.is_granted_by("redis-0"));
    assert!(!handle.is_granted_by("redis-3"));
}

#[test]
fn test_majority_unreachable_times_out() {
    let c = cluster(3);
    c.stores[1].set_available(false);
    c.stores[2].set_available(false);

    let result = c.lock.acquire("stock-lock", TTL, BUDGET, &CancelToken::new());
    match result {
        Err(
            e @ AcquireError::Timeout {
                granted: 1,
                required: 2,
                unavailable: 2,
            },
        ) => assert!(e.is_store_outage()),
        other => panic!("expected Timeout, got {:?}", other),
    }

    // The single partial grant was cleaned up
    assert_eq!(c.stores[0].get("stock-lock").unwrap(), None);
}

#[test]
fn test_contended_key_times_out_without_outage() {
    let c = cluster(3);
    let cancel = CancelToken::new();

    let _held = c.lock.acquire("stock-lock", TTL, BUDGET, &cancel).unwrap();

    match c.lock.acquire("stock-lock", TTL, BUDGET, &cancel) {
        Err(e @ AcquireError::Timeout { granted: 0, .. }) => assert!(!e.is_store_outage()),
        other => panic!("expected Timeout, got {:?}", other),
    }
}

#[test]
fn test_split_vote_cleans_up_minority_grant() {
    let c = cluster(3);

    // Another competitor already owns two of the three stores
    c.stores[0].set_if_absent("stock-lock", "other", TTL).unwrap();
    c.stores[1].set_if_absent("stock-lock", "other", TTL).unwrap();

    let result = c.lock.acquire("stock-lock", TTL, BUDGET, &CancelToken::new());
    assert!(matches!(
        result,
        Err(AcquireError::Timeout {
            granted: 1,
            required: 2,
            unavailable: 0,
        })
    ));

    assert_eq!(
        holders(&c.stores, "stock-lock"),
        vec![Some("other".to_string()), Some("other".to_string()), None]
    );
}

#[test]
fn test_slow_store_counts_as_unavailable() {
    let c = cluster(3);
    c.stores[2].set_latency(Duration::from_millis(400));

    let start = Instant::now();
    let handle = c.lock.acquire("stock-lock", TTL, BUDGET, &CancelToken::new()).unwrap();

    assert!(start.elapsed() < Duration::from_millis(400));
    assert_eq!(handle.granted_stores().len(), 2);
    assert!(!handle.is_granted_by("redis-2"));

    // The slow store's late grant is withdrawn, not left to its TTL
    thread::sleep(Duration::from_millis(1200));
    c.stores[2].set_latency(Duration::ZERO);
    assert_eq!(c.stores[2].get("stock-lock").unwrap(), None);
    assert_eq!(c.lock.release(&handle).unwrap(), ReleaseOutcome::Released);
}

#[test]
fn test_ttl_beyond_clock_range_rejected() {
    let c = cluster(3);

    for ttl in [Duration::MAX, Duration::from_secs(u64::MAX / 2)] {
        assert!(matches!(
            c.lock.acquire("stock-lock", ttl, BUDGET, &CancelToken::new()),
            Err(AcquireError::InvalidTtl(_))
        ));
    }
    assert!(c.stores.iter().all(|s| s.is_empty()));

    let handle = c.lock.acquire("stock-lock", TTL, BUDGET, &CancelToken::new()).unwrap();
    assert!(matches!(
        c.lock.extend(&handle, Duration::MAX),
        Err(ExtendError::InvalidTtl(_))
    ));
    assert_eq!(handle.state(c.clock.now()), HandleState::Held);
}

#[test]
fn test_validity_accounts_for_drift() {
    let c = cluster(3);
    let handle = c.lock.acquire("stock-lock", TTL, BUDGET, &CancelToken::new()).unwrap();

    // Manual clock does not move during acquire: validity = ttl - drift
    let drift = c.lock.config().drift_for(TTL);
    assert_eq!(handle.validity(), TTL - drift);
    assert_eq!(handle.deadline(), handle.acquired_at() + TTL - drift);
}

#[test]
fn test_ttl_smaller_than_drift_never_acquires() {
    let c = cluster(3);
    let result = c
        .lock
        .acquire("stock-lock", Duration::from_millis(1), BUDGET, &CancelToken::new());

    assert!(matches!(result, Err(AcquireError::Timeout { .. })));
    assert_eq!(holders(&c.stores, "stock-lock"), vec![None, None, None]);
}

#[test]
fn test_sequential_acquisitions_use_fresh_tokens() {
    let c = cluster(3);
    let cancel = CancelToken::new();

    let first = c.lock.acquire("stock-lock", TTL, BUDGET, &cancel).unwrap();
    c.lock.release(&first).unwrap();
    let second = c.lock.acquire("stock-lock", TTL, BUDGET, &cancel).unwrap();

    assert_ne!(first.token(), second.token());
}

// =============================================================================
// Release Tests
// =============================================================================

#[test]
fn test_release_twice() {
    let c = cluster(3);
    let handle = c.lock.acquire("stock-lock", TTL, BUDGET, &CancelToken::new()).unwrap();

    assert_eq!(c.lock.release(&handle).unwrap(), ReleaseOutcome::Released);
    assert_eq!(c.lock.release(&handle).unwrap(), ReleaseOutcome::AlreadyExpired);
}

#[test]
fn test_release_after_critical_section_overran() {
    // TTL 1s, critical section 2s
    let c = cluster(3);
    let handle = c
        .lock
        .acquire("stock-lock", Duration::from_secs(1), BUDGET, &CancelToken::new())
        .unwrap();

    c.clock.advance(Duration::from_secs(2));

    assert_eq!(handle.state(c.clock.now()), HandleState::Expired);
    assert_eq!(c.lock.release(&handle).unwrap(), ReleaseOutcome::AlreadyExpired);
}

#[test]
fn test_expired_release_spares_new_holder() {
    let c = cluster(3);
    let cancel = CancelToken::new();

    let stale = c
        .lock
        .acquire("stock-lock", Duration::from_secs(1), BUDGET, &cancel)
        .unwrap();
    c.clock.advance(Duration::from_secs(2));
    let fresh = c.lock.acquire("stock-lock", TTL, BUDGET, &cancel).unwrap();

    assert_eq!(c.lock.release(&stale).unwrap(), ReleaseOutcome::AlreadyExpired);
    for holder in holders(&c.stores, "stock-lock") {
        assert_eq!(holder, Some(fresh.token().to_string()));
    }
}

#[test]
fn test_release_skips_store_that_lost_token() {
    let c = cluster(3);
    let handle = c.lock.acquire("stock-lock", TTL, BUDGET, &CancelToken::new()).unwrap();

    // One store dropped the key on its own (e.g. restart)
    c.stores[1]
        .delete_if_equals("stock-lock", handle.token().as_str())
        .unwrap();

    assert_eq!(c.lock.release(&handle).unwrap(), ReleaseOutcome::Released);
    assert_eq!(holders(&c.stores, "stock-lock"), vec![None, None, None]);
}

#[test]
fn test_partial_release() {
    let c = cluster(3);
    let handle = c.lock.acquire("stock-lock", TTL, BUDGET, &CancelToken::new()).unwrap();

    c.stores[0].set_available(false);

    assert_eq!(
        c.lock.release(&handle).unwrap(),
        ReleaseOutcome::ReleasedPartial {
            unreached: vec!["redis-0".to_string()]
        }
    );
    assert_eq!(handle.state(c.clock.now()), HandleState::ReleasedPartial);

    // Second release is a no-op
    assert_eq!(c.lock.release(&handle).unwrap(), ReleaseOutcome::AlreadyExpired);

    // The unreached store still holds the token until its TTL runs out
    c.stores[0].set_available(true);
    assert_eq!(
        c.stores[0].get("stock-lock").unwrap(),
        Some(handle.token().to_string())
    );
    c.clock.advance(TTL);
    assert_eq!(c.stores[0].get("stock-lock").unwrap(), None);
}

#[test]
fn test_release_with_every_store_down() {
    let c = cluster(3);
    let handle = c.lock.acquire("stock-lock", TTL, BUDGET, &CancelToken::new()).unwrap();

    for store in &c.stores {
        store.set_available(false);
    }

    assert!(matches!(
        c.lock.release(&handle),
        Err(ReleaseError::StoreUnavailable { .. })
    ));
    assert_eq!(handle.state(c.clock.now()), HandleState::Held);
}

#[test]
fn test_foreign_handle_rejected() {
    let a = cluster(3);
    let b_stores: Vec<Arc<MemoryStore>> = (0..3)
        .map(|i| Arc::new(MemoryStore::new(format!("other-{}", i))))
        .collect();
    let b = quorum_over(&b_stores);

    let handle = a.lock.acquire("stock-lock", TTL, BUDGET, &CancelToken::new()).unwrap();
    assert!(matches!(
        b.release(&handle),
        Err(ReleaseError::ForeignHandle(_))
    ));
}

// =============================================================================
// Extend Tests
// =============================================================================

#[test]
fn test_extend_on_majority() {
    let c = cluster(3);
    let handle = c
        .lock
        .acquire("stock-lock", Duration::from_secs(5), BUDGET, &CancelToken::new())
        .unwrap();

    c.clock.advance(Duration::from_secs(4));
    c.stores[2].set_available(false);

    let extended = c.lock.extend(&handle, TTL).unwrap();
    assert_eq!(extended.granted_stores().len(), 2);
    assert_eq!(extended.token(), handle.token());
    assert_eq!(handle.state(c.clock.now()), HandleState::Superseded);

    c.clock.advance(Duration::from_secs(10));
    assert_eq!(extended.state(c.clock.now()), HandleState::Held);
    assert_eq!(c.lock.release(&extended).unwrap(), ReleaseOutcome::Released);
}

#[test]
fn test_extend_without_majority_is_lost() {
    let c = cluster(3);
    let handle = c.lock.acquire("stock-lock", TTL, BUDGET, &CancelToken::new()).unwrap();

    // Two stores no longer hold the token
    for store in &c.stores[..2] {
        store
            .delete_if_equals("stock-lock", handle.token().as_str())
            .unwrap();
    }

    assert!(matches!(
        c.lock.extend(&handle, TTL),
        Err(ExtendError::Lost(_))
    ));
    assert_eq!(handle.state(c.clock.now()), HandleState::Held);
}

#[test]
fn test_extend_with_stores_down_reports_outage() {
    let c = cluster(3);
    let handle = c.lock.acquire("stock-lock", TTL, BUDGET, &CancelToken::new()).unwrap();

    c.stores[0].set_available(false);
    c.stores[1].set_available(false);

    assert!(matches!(
        c.lock.extend(&handle, TTL),
        Err(ExtendError::StoreUnavailable { .. })
    ));
}

// =============================================================================
// Cancellation & Retry Tests
// =============================================================================

#[test]
fn test_cancel_during_slow_acquire_cleans_up() {
    let clock = Arc::new(ManualClock::new());
    let stores: Vec<Arc<MemoryStore>> = (0..3)
        .map(|i| Arc::new(MemoryStore::with_clock(format!("redis-{}", i), clock.clone())))
        .collect();
    stores[1].set_latency(Duration::from_millis(300));
    stores[2].set_latency(Duration::from_millis(300));

    let clients: Vec<Arc<dyn StoreClient>> = stores
        .iter()
        .map(|s| s.clone() as Arc<dyn StoreClient>)
        .collect();
    let lock = QuorumLock::new(
        clients,
        LockConfig::builder()
            .store_timeout(Duration::from_secs(5))
            .build(),
    )
    .unwrap()
    .with_clock(clock.clone());

    let cancel = CancelToken::new();
    let canceller = {
        let cancel = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            cancel.cancel();
        })
    };

    let start = Instant::now();
    let result = lock.acquire("stock-lock", TTL, Duration::from_secs(5), &cancel);
    canceller.join().unwrap();

    assert!(matches!(result, Err(AcquireError::Cancelled)));
    assert!(start.elapsed() < Duration::from_secs(5));

    // Let the slow writes land; their threads then withdraw them
    thread::sleep(Duration::from_secs(1));
    for store in &stores {
        store.set_latency(Duration::ZERO);
    }
    assert_eq!(holders(&stores, "stock-lock"), vec![None, None, None]);
}

#[test]
fn test_retry_until_holder_releases() {
    let c = cluster(3);
    let lock = Arc::new(c.lock);

    let first = lock.acquire("stock-lock", TTL, BUDGET, &CancelToken::new()).unwrap();

    let releaser = {
        let lock = Arc::clone(&lock);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            lock.release(&first).unwrap()
        })
    };

    let policy = RetryPolicy {
        attempts: 50,
        base_delay: Duration::from_millis(10),
        max_jitter: Duration::from_millis(5),
    };
    let second = lock
        .acquire_with_retry("stock-lock", TTL, BUDGET, &policy, &CancelToken::new())
        .unwrap();

    assert_eq!(releaser.join().unwrap(), ReleaseOutcome::Released);
    assert_eq!(second.granted_stores().len(), 3);
}

#[test]
fn test_retry_gives_up_after_attempts() {
    let c = cluster(3);
    let cancel = CancelToken::new();
    let _held = c.lock.acquire("stock-lock", TTL, BUDGET, &cancel).unwrap();

    let policy = RetryPolicy {
        attempts: 3,
        base_delay: Duration::from_millis(1),
        max_jitter: Duration::ZERO,
    };
    assert!(matches!(
        c.lock.acquire_with_retry("stock-lock", TTL, BUDGET, &policy, &cancel),
        Err(AcquireError::Timeout { .. })
    ));
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_mutual_exclusion_under_contention() {
    let stores: Vec<Arc<MemoryStore>> = (0..3)
        .map(|i| Arc::new(MemoryStore::new(format!("redis-{}", i))))
        .collect();
    let clients: Vec<Arc<dyn StoreClient>> = stores
        .iter()
        .map(|s| s.clone() as Arc<dyn StoreClient>)
        .collect();
    // Generous store timeout so a descheduled worker thread never leaves a late grant behind
    let lock = Arc::new(
        QuorumLock::new(
            clients,
            LockConfig::builder()
                .store_timeout(Duration::from_secs(2))
                .build(),
        )
        .unwrap(),
    );
    let inside = Arc::new(AtomicUsize::new(0));
    let max_inside = Arc::new(AtomicUsize::new(0));
    let acquired = Arc::new(AtomicUsize::new(0));

    let policy = RetryPolicy {
        attempts: 1000,
        base_delay: Duration::from_millis(1),
        max_jitter: Duration::from_millis(3),
    };

    let workers: Vec<_> = (0..6)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            let acquired = Arc::clone(&acquired);
            let policy = policy.clone();
            thread::spawn(move || {
                let cancel = CancelToken::new();
                for _ in 0..5 {
                    let handle = lock
                        .acquire_with_retry("counter", TTL, Duration::from_secs(2), &policy, &cancel)
                        .unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(1));
                    inside.fetch_sub(1, Ordering::SeqCst);
                    acquired.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(lock.release(&handle).unwrap(), ReleaseOutcome::Released);
                }
            })
        })
        .collect();

    for w in workers {
        w.join().unwrap();
    }

    assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    assert_eq!(acquired.load(Ordering::SeqCst), 30);
}

#[test]
fn test_with_lock_reports_outcome() {
    let c = cluster(3);
    let guarded = c
        .lock
        .with_lock("stock-lock", TTL, BUDGET, &CancelToken::new(), |handle| {
            handle.granted_stores().len()
        })
        .unwrap();

    assert_eq!(guarded.value, 3);
    assert!(!guarded.is_suspect());
    assert_eq!(guarded.into_parts().unwrap(), (3, ReleaseOutcome::Released));
}

#[test]
fn test_with_lock_keeps_value_when_release_fails() {
    let c = cluster(3);
    let guarded = c
        .lock
        .with_lock("stock-lock", TTL, BUDGET, &CancelToken::new(), |_| {
            for store in &c.stores {
                store.set_available(false);
            }
            "sold"
        })
        .unwrap();

    assert_eq!(guarded.value, "sold");
    assert!(matches!(
        guarded.outcome,
        Err(ReleaseError::StoreUnavailable { .. })
    ));
    assert!(!guarded.is_suspect());
    assert!(guarded.into_parts().is_err());
}
