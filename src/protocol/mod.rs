//! Protocol Module
//!
//! Wire protocol between [`TcpStore`](crate::store::TcpStore) and the lease-store
//! [`Server`](crate::network::Server).
//!
//! ## Frame Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Len (4)  │ CRC (4)  │     Data (bincode)          │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//! `Len` and `CRC` are big-endian; the CRC32 covers `Data` only.
//!
//! ### Commands
//! - `Ping`
//! - `SetIfAbsent { key, value, ttl_ms }`
//! - `Get { key }`
//! - `DeleteIfEquals { key, value }`
//! - `ExpireIfEquals { key, value, ttl_ms }`
//!
//! ### Responses
//! - `Pong`
//! - `Bool(bool)`: outcome of a conditional write
//! - `Value(Option<String>)`: result of `Get`
//! - `Error(String)`: the store refused the request

mod command;
mod response;
mod codec;

pub use command::{Command, CommandType};
pub use response::Response;
pub use codec::{
    decode_command, decode_response, encode_command, encode_response, read_command,
    read_response, write_command, write_response, HEADER_SIZE, MAX_FRAME_SIZE,
};
