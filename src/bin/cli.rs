//! quorumlock CLI Client
//!
//! Command-line interface for poking lease stores and holding locks.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use quorumlock::{
    CancelToken, LeaseLock, LockConfig, LockError, MemoryStore, QuorumLock, ReleaseOutcome,
    RetryPolicy, StoreClient, TcpStore,
};
use tracing_subscriber::{fmt, EnvFilter};

/// quorumlock CLI
#[derive(Parser, Debug)]
#[command(name = "quorumlock-cli")]
#[command(about = "CLI for quorumlock lease stores")]
struct Args {
    /// Store address; repeat for a quorum. Without any, in-memory stores are used.
    #[arg(short, long = "store")]
    stores: Vec<String>,

    /// Per-store call timeout in milliseconds
    #[arg(long, default_value = "50")]
    store_timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ping every store
    Ping,

    /// Show the current holder token of a key on every store
    Get {
        /// The lock key
        key: String,
    },

    /// Acquire a quorum lock, hold it, then release it
    Hold {
        /// The lock key
        key: String,

        /// Lease TTL in milliseconds
        #[arg(long, default_value = "30000")]
        ttl_ms: u64,

        /// How long to keep the lock in milliseconds
        #[arg(long, default_value = "5000")]
        hold_ms: u64,

        /// Acquisition budget in milliseconds
        #[arg(long, default_value = "1000")]
        budget_ms: u64,
    },

    /// Workers race to sell limited stock kept in the first store, one sale
    /// at a time under the lock. Run it from several processes against the
    /// same stores to contend across processes.
    Demo {
        /// Initial stock
        #[arg(long, default_value = "10")]
        stock: i64,

        /// Number of competing workers
        #[arg(long, default_value = "4")]
        workers: usize,

        /// Orders each worker places
        #[arg(long, default_value = "5")]
        orders: usize,
    },
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_target(false).init();

    let args = Args::parse();
    let timeout = Duration::from_millis(args.store_timeout_ms);
    let stores = connect(&args.stores, timeout);

    let result = match args.command {
        Commands::Ping => {
            ping(&stores);
            Ok(())
        }
        Commands::Get { key } => {
            get(&stores, &key);
            Ok(())
        }
        Commands::Hold {
            key,
            ttl_ms,
            hold_ms,
            budget_ms,
        } => build_lock(stores, timeout).and_then(|lock| {
            hold(
                &lock,
                &key,
                Duration::from_millis(ttl_ms),
                Duration::from_millis(hold_ms),
                Duration::from_millis(budget_ms),
            )
        }),
        Commands::Demo {
            stock,
            workers,
            orders,
        } => match stores.first().cloned() {
            Some(stock_store) => build_lock(stores, timeout)
                .map(|lock| demo(Arc::new(lock), stock_store, stock, workers, orders)),
            None => Err("no stores configured".to_string()),
        },
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn connect(addrs: &[String], timeout: Duration) -> Vec<Arc<dyn StoreClient>> {
    if addrs.is_empty() {
        return (0..3)
            .map(|i| Arc::new(MemoryStore::new(format!("mem-{}", i))) as Arc<dyn StoreClient>)
            .collect();
    }
    addrs
        .iter()
        .map(|addr| Arc::new(TcpStore::new(addr.clone(), timeout)) as Arc<dyn StoreClient>)
        .collect()
}

fn build_lock(stores: Vec<Arc<dyn StoreClient>>, timeout: Duration) -> Result<QuorumLock, String> {
    let config = LockConfig::builder().store_timeout(timeout).build();
    QuorumLock::new(stores, config).map_err(|e| e.to_string())
}

fn ping(stores: &[Arc<dyn StoreClient>]) {
    for store in stores {
        match store.ping() {
            Ok(()) => println!("{}: PONG", store.id()),
            Err(e) => println!("{}: {}", store.id(), e),
        }
    }
}

fn get(stores: &[Arc<dyn StoreClient>], key: &str) {
    for store in stores {
        match store.get(key) {
            Ok(Some(token)) => println!("{}: {}", store.id(), token),
            Ok(None) => println!("{}: (free)", store.id()),
            Err(e) => println!("{}: {}", store.id(), e),
        }
    }
}

fn hold(
    lock: &QuorumLock,
    key: &str,
    ttl: Duration,
    hold_for: Duration,
    budget: Duration,
) -> Result<(), String> {
    let cancel = CancelToken::new();
    let handle = lock
        .acquire_with_retry(key, ttl, budget, &RetryPolicy::default(), &cancel)
        .map_err(|e| e.to_string())?;

    println!(
        "acquired {} on {:?}, valid for {:?}",
        key,
        handle.granted_stores(),
        handle.validity()
    );
    thread::sleep(hold_for);

    match lock.release(&handle).map_err(|e| e.to_string())? {
        ReleaseOutcome::Released => println!("released"),
        ReleaseOutcome::AlreadyExpired => {
            println!("lease expired while held; another holder may have run concurrently")
        }
        ReleaseOutcome::ReleasedPartial { unreached } => {
            println!("released, but {:?} were unreachable and will expire by ttl", unreached)
        }
    }
    Ok(())
}

const STOCK_KEY: &str = "stock";
const STOCK_TTL: Duration = Duration::from_secs(3600);

fn demo(lock: Arc<QuorumLock>, stock_store: Arc<dyn StoreClient>, stock: i64, workers: usize, orders: usize) {
    match stock_store.set_if_absent(STOCK_KEY, &stock.to_string(), STOCK_TTL) {
        Ok(true) => println!("stock set to {} on {}", stock, stock_store.id()),
        Ok(false) => println!("using existing stock on {}", stock_store.id()),
        Err(e) => {
            eprintln!("error: cannot initialise stock: {}", e);
            return;
        }
    }

    let policy = RetryPolicy {
        attempts: 50,
        base_delay: Duration::from_millis(5),
        max_jitter: Duration::from_millis(20),
    };

    let threads: Vec<_> = (0..workers)
        .map(|worker| {
            let lock = Arc::clone(&lock);
            let stock_store = Arc::clone(&stock_store);
            let policy = policy.clone();
            thread::spawn(move || {
                let cancel = CancelToken::new();
                for _ in 0..orders {
                    let handle = match lock.acquire_with_retry(
                        "stock-lock",
                        Duration::from_secs(30),
                        Duration::from_secs(1),
                        &policy,
                        &cancel,
                    ) {
                        Ok(h) => h,
                        Err(e) => {
                            println!("worker {}: {}", worker, LockError::from(e));
                            continue;
                        }
                    };

                    match deduct(stock_store.as_ref()) {
                        Ok(Some(left)) => println!("worker {}: deducted stock, {} remaining", worker, left),
                        Ok(None) => println!("worker {}: failed to deduct stock", worker),
                        Err(e) => println!("worker {}: {}", worker, e),
                    }

                    match lock.release(&handle) {
                        Ok(ReleaseOutcome::AlreadyExpired) => eprintln!(
                            "worker {}: warning: lease expired before release, the sale may have raced another holder",
                            worker
                        ),
                        Ok(_) => {}
                        Err(e) => println!("worker {}: {}", worker, e),
                    }
                }
            })
        })
        .collect();

    for t in threads {
        let _ = t.join();
    }

    match stock_store.get(STOCK_KEY) {
        Ok(Some(left)) => println!("final stock: {}", left),
        Ok(None) => println!("final stock: (gone)"),
        Err(e) => println!("final stock unknown: {}", e),
    }
}

/// Read-modify-write of the shared stock; only safe under the lock.
/// Returns the new count, or `None` when sold out.
fn deduct(store: &dyn StoreClient) -> Result<Option<i64>, String> {
    let current = store
        .get(STOCK_KEY)
        .map_err(|e| e.to_string())?
        .ok_or("stock key missing")?;
    let left: i64 = current.parse().map_err(|_| format!("bad stock value {:?}", current))?;
    if left <= 0 {
        return Ok(None);
    }

    if !store.delete_if_equals(STOCK_KEY, &current).map_err(|e| e.to_string())? {
        return Err("stock changed outside the lock".to_string());
    }
    store
        .set_if_absent(STOCK_KEY, &(left - 1).to_string(), STOCK_TTL)
        .map_err(|e| e.to_string())?;
    Ok(Some(left - 1))
}
