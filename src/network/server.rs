//! TCP Server
//!
//! Accepts connections and hands each one to its own thread.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::store::StoreClient;

use super::Connection;

/// How long the acceptor sleeps when no connection is pending
const ACCEPT_POLL: Duration = Duration::from_millis(20);

/// Clonable handle that stops a running [`Server`]
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Signal the server to stop accepting and return from `run`
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// TCP server exposing one store
pub struct Server {
    config: ServerConfig,
    store: Arc<dyn StoreClient>,
    listener: TcpListener,
    shutdown: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
}

impl Server {
    /// Bind the listen address from `config`
    pub fn bind(config: ServerConfig, store: Arc<dyn StoreClient>) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr)?;
        listener.set_nonblocking(true)?;

        tracing::info!(
            "Serving store {} on {}",
            store.id(),
            listener.local_addr()?
        );

        Ok(Self {
            config,
            store,
            listener,
            shutdown: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle for stopping the server from another thread
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
        }
    }

    /// Number of connections currently being served
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Accept connections until shut down (blocking)
    pub fn run(&self) -> Result<()> {
        while !self.shutdown.load(Ordering::SeqCst) {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    continue;
                }
            };

            if self.active.load(Ordering::SeqCst) >= self.config.max_connections {
                tracing::warn!("Rejecting {}: {} connections open", peer, self.config.max_connections);
                drop(stream);
                continue;
            }

            // Connections use blocking I/O with timeouts
            if let Err(e) = stream.set_nonblocking(false) {
                tracing::warn!("Failed to set up connection from {}: {}", peer, e);
                continue;
            }

            let mut connection = match Connection::new(stream, Arc::clone(&self.store)) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!("Failed to set up connection from {}: {}", peer, e);
                    continue;
                }
            };
            if let Err(e) = connection.set_timeouts(self.config.read_timeout_ms, self.config.write_timeout_ms) {
                tracing::warn!("Failed to set timeouts for {}: {}", peer, e);
                continue;
            }

            let active = Arc::clone(&self.active);
            active.fetch_add(1, Ordering::SeqCst);
            thread::spawn(move || {
                if let Err(e) = connection.handle() {
                    tracing::debug!("Connection {} closed with error: {}", connection.peer_addr(), e);
                }
                active.fetch_sub(1, Ordering::SeqCst);
            });
        }

        tracing::info!("Server on {} stopped accepting", self.config.listen_addr);
        Ok(())
    }
}
