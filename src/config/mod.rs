//! # Pool Configuration
//!
//! Explicit configuration passed into [`WorkerPool::new`](crate::pool::WorkerPool::new).
//! Nothing is read from process-wide state at pool construction; the
//! [`ConfigManager`] is an optional convenience for loading layered settings.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use workpool::config::{ConfigManager, PoolConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Defaults, then config/workpool.*, then config/workpool-{env}.*, then WORKPOOL__* variables
//! let manager = ConfigManager::load()?;
//! let config: &PoolConfig = manager.config();
//! println!("stats every {:?}", config.stats_interval());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::resilience::backoff::BackoffPolicy;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Worker pool settings. Time values are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of workers; host concurrency when unset
    pub size: Option<usize>,
    pub stats_interval_ms: u64,
    /// Memory value that normalizes to a full load term
    pub memory_ceiling_bytes: u64,
    /// Round-trip time that normalizes to a full load term
    pub response_time_ceiling_ms: f64,
    pub revival: RevivalConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: None,
            stats_interval_ms: 1000,
            memory_ceiling_bytes: 536_870_912,
            response_time_ceiling_ms: 1000.0,
            revival: RevivalConfig::default(),
        }
    }
}

/// Backoff settings for reviving crashed workers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RevivalConfig {
    pub max_attempts: u32,
    pub starting_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub full_jitter: bool,
}

impl Default for RevivalConfig {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            starting_delay_ms: 300,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            full_jitter: true,
        }
    }
}

impl PoolConfig {
    /// Configured size, or the host's available parallelism
    pub fn resolved_size(&self) -> usize {
        self.size.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::from(&self.revival)
    }

    /// Reject values the pool cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.size == Some(0) {
            return Err(ConfigurationError::invalid_value(
                "size",
                0,
                "a pool needs at least one worker",
            ));
        }
        if self.stats_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "stats_interval_ms",
                0,
                "must be positive",
            ));
        }
        if self.memory_ceiling_bytes == 0 {
            return Err(ConfigurationError::invalid_value(
                "memory_ceiling_bytes",
                0,
                "used as a divisor, must be positive",
            ));
        }
        if !(self.response_time_ceiling_ms > 0.0 && self.response_time_ceiling_ms.is_finite()) {
            return Err(ConfigurationError::invalid_value(
                "response_time_ceiling_ms",
                self.response_time_ceiling_ms,
                "used as a divisor, must be positive and finite",
            ));
        }
        self.revival.validate()
    }
}

impl RevivalConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.multiplier >= 1.0 && self.multiplier.is_finite()) {
            return Err(ConfigurationError::invalid_value(
                "revival.multiplier",
                self.multiplier,
                "must be a finite value of at least 1",
            ));
        }
        if self.max_delay_ms < self.starting_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "revival.max_delay_ms",
                self.max_delay_ms,
                format!(
                    "must not be below revival.starting_delay_ms ({})",
                    self.starting_delay_ms
                ),
            ));
        }
        Ok(())
    }
}

impl From<&RevivalConfig> for BackoffPolicy {
    fn from(config: &RevivalConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            starting_delay: Duration::from_millis(config.starting_delay_ms),
            multiplier: config.multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
            full_jitter: config.full_jitter,
        }
    }
}
