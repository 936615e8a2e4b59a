//! Network Module
//!
//! TCP lease-store server.
//!
//! ## Architecture
//! - Single acceptor thread (non-blocking accept, polls the shutdown flag)
//! - One thread per connection, capped at `max_connections`
//! - Commands executed directly against the served [`StoreClient`](crate::store::StoreClient)

mod server;
mod connection;

pub use server::{Server, ShutdownHandle};
pub use connection::Connection;
