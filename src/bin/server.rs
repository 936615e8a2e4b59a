//! quorumlock Store Server Binary
//!
//! Serves one in-memory lease store over TCP. Run several on different ports
//! to give a quorum lock independent stores.

use std::sync::Arc;

use clap::Parser;
use quorumlock::network::Server;
use quorumlock::{MemoryStore, ServerConfig};
use tracing_subscriber::{fmt, EnvFilter};

/// quorumlock lease-store server
#[derive(Parser, Debug)]
#[command(name = "quorumlock-server")]
#[command(about = "In-memory lease store for quorumlock clients")]
#[command(version)]
struct Args {
    /// Listen address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:7420")]
    listen: String,

    /// Store id reported in logs
    #[arg(short, long, default_value = "store-0")]
    id: String,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,

    /// Idle connection timeout in milliseconds (0 = none)
    #[arg(short, long, default_value = "30000")]
    read_timeout_ms: u64,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,quorumlock=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("quorumlock store server v{}", quorumlock::VERSION);

    let config = ServerConfig::builder()
        .listen_addr(&args.listen)
        .store_id(&args.id)
        .max_connections(args.max_connections)
        .read_timeout_ms(args.read_timeout_ms)
        .build();

    let store = Arc::new(MemoryStore::new(config.store_id.clone()));

    let server = match Server::bind(config, store) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", args.listen, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}
