//! Configuration for quorumlock
//!
//! Centralized configuration with sensible defaults.

use std::time::Duration;

use crate::error::ConfigError;

/// Tunables shared by both lock flavours
#[derive(Debug, Clone)]
pub struct LockConfig {
    // -------------------------------------------------------------------------
    // Lease Configuration
    // -------------------------------------------------------------------------
    /// Lease length used when the caller does not pick one
    pub default_ttl: Duration,

    /// Fraction of the TTL reserved for clock drift between stores
    /// (plus a fixed 2ms, see [`LockConfig::drift_for`])
    pub clock_drift_factor: f64,

    // -------------------------------------------------------------------------
    // Acquisition Configuration
    // -------------------------------------------------------------------------
    /// Overall acquisition budget used when the caller does not pick one
    pub acquire_budget: Duration,

    /// Upper bound for one store call; keep it small relative to the TTL
    pub store_timeout: Duration,

    /// Delay between `set_if_absent` attempts of the single-instance lock
    pub poll_interval: Duration,
}

impl LockConfig {
    /// Fixed part of the drift margin
    pub const DRIFT_FLOOR: Duration = Duration::from_millis(2);

    /// Create a new config builder
    pub fn builder() -> LockConfigBuilder {
        LockConfigBuilder::default()
    }

    /// Safety margin subtracted from a lease of length `ttl`
    pub fn drift_for(&self, ttl: Duration) -> Duration {
        let nanos = (ttl.as_nanos() as f64 * self.clock_drift_factor).round();
        Duration::from_nanos(nanos as u64) + Self::DRIFT_FLOOR
    }

    /// Check the settings are usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.clock_drift_factor) {
            return Err(ConfigError::Invalid(format!(
                "clock_drift_factor must be in [0, 1), got {}",
                self.clock_drift_factor
            )));
        }
        if self.store_timeout.is_zero() {
            return Err(ConfigError::Invalid("store_timeout must be positive".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("poll_interval must be positive".into()));
        }
        if self.default_ttl.is_zero() {
            return Err(ConfigError::Invalid("default_ttl must be positive".into()));
        }
        Ok(())
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(30),
            clock_drift_factor: 0.01,
            acquire_budget: Duration::from_secs(1),
            store_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Builder for LockConfig
#[derive(Default)]
pub struct LockConfigBuilder {
    config: LockConfig,
}

impl LockConfigBuilder {
    /// Set the default lease TTL
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl = ttl;
        self
    }

    /// Set the clock drift factor
    pub fn clock_drift_factor(mut self, factor: f64) -> Self {
        self.config.clock_drift_factor = factor;
        self
    }

    /// Set the default acquisition budget
    pub fn acquire_budget(mut self, budget: Duration) -> Self {
        self.config.acquire_budget = budget;
        self
    }

    /// Set the per-store call timeout
    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.config.store_timeout = timeout;
        self
    }

    /// Set the single-instance poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn build(self) -> LockConfig {
        self.config
    }
}

/// Configuration of the TCP lease-store server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP listen address
    pub listen_addr: String,

    /// Identifier the served store reports
    pub store_id: String,

    /// Max concurrent client connections
    pub max_connections: usize,

    /// Connection read timeout (milliseconds, 0 = none)
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds, 0 = none)
    pub write_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7420".to_string(),
            store_id: "store-0".to_string(),
            max_connections: 1024,
            read_timeout_ms: 30_000,
            write_timeout_ms: 5000,
        }
    }
}

impl ServerConfig {
    /// Create a new config builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }
}

/// Builder for ServerConfig
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the served store id
    pub fn store_id(mut self, id: impl Into<String>) -> Self {
        self.config.store_id = id.into();
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}
