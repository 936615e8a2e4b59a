//! Command definitions
//!
//! Requests a client sends to a lease store.

use serde::{Deserialize, Serialize};

/// Command types, used for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    Ping,
    SetIfAbsent,
    Get,
    DeleteIfEquals,
    ExpireIfEquals,
}

/// A store request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Health check
    Ping,

    /// Write `value` unless `key` holds a live value
    SetIfAbsent {
        key: String,
        value: String,
        ttl_ms: u64,
    },

    /// Read the live value of `key`
    Get { key: String },

    /// Delete `key` if it holds `value`
    DeleteIfEquals { key: String, value: String },

    /// Re-arm the TTL of `key` if it holds `value`
    ExpireIfEquals {
        key: String,
        value: String,
        ttl_ms: u64,
    },
}

impl Command {
    /// Get the command type
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::Ping => CommandType::Ping,
            Command::SetIfAbsent { .. } => CommandType::SetIfAbsent,
            Command::Get { .. } => CommandType::Get,
            Command::DeleteIfEquals { .. } => CommandType::DeleteIfEquals,
            Command::ExpireIfEquals { .. } => CommandType::ExpireIfEquals,
        }
    }
}
