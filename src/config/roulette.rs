//! Dispatch loop configuration.

use std::time::Duration;

use super::parse::env_required_duration;
use super::ConfigError;

/// Roulette timing loaded from environment.
#[derive(Clone, Debug)]
pub struct RouletteConfig {
    /// Base period for reconnect backoff and idle sleeps.
    pub restart_interval: Duration,
    /// How long one reserve blocks waiting for a job.
    pub reserve_timeout: Duration,
}

impl Default for RouletteConfig {
    fn default() -> Self {
        Self {
            restart_interval: Duration::from_secs(15),
            reserve_timeout: Duration::from_secs(15),
        }
    }
}

impl RouletteConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            restart_interval: env_required_duration("ROULETTE_RESTART_INTERVAL", "15s")?,
            reserve_timeout: env_required_duration("ROULETTE_RESERVE_TIMEOUT", "15s")?,
        })
    }
}
