//! Response definitions
//!
//! Replies a lease store sends back.

use serde::{Deserialize, Serialize};

/// A store reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// Reply to `Ping`
    Pong,

    /// Outcome of a conditional write
    Bool(bool),

    /// Live value for `Get`
    Value(Option<String>),

    /// The request was refused
    Error(String),
}

impl Response {
    /// Create an ERROR response
    pub fn error(message: &str) -> Self {
        Response::Error(message.to_string())
    }
}
