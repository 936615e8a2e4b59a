//! Lock tokens
//!
//! A fresh random value per acquisition attempt. The token is what a store
//! holds for the key, so a holder can only delete or extend its own lease.

use std::fmt;

use uuid::Uuid;

/// Random 128-bit identifier of one acquisition attempt
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    /// Generate a new random token
    pub fn generate() -> Self {
        Self(Uuid::new_v4().hyphenated().to_string())
    }

    /// Token as stored in the key's value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
