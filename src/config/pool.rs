//! Connection pool configuration.

use std::time::Duration;

use super::parse::{env_duration, env_parse, env_required_duration};
use super::ConfigError;

/// Pool sizing and timeouts loaded from environment.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Connections opened eagerly at startup.
    pub initial_cap: usize,
    /// Upper bound on live connections (idle + checked out).
    pub max_cap: usize,
    /// Idle connections older than this are closed (None = never).
    pub idle_timeout: Option<Duration>,
    /// How long `acquire` waits for a free slot.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_cap: 0,
            max_cap: 30,
            idle_timeout: Some(Duration::from_secs(15)),
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            initial_cap: env_parse("POOL_INITIAL_CAP", 0)?,
            max_cap: env_parse("POOL_MAX_CAP", 30)?,
            idle_timeout: env_duration("POOL_IDLE_TIMEOUT", "15s")?,
            acquire_timeout: env_required_duration("POOL_ACQUIRE_TIMEOUT", "5s")?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check capacity bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_cap == 0 {
            return Err(ConfigError::Invalid {
                key: "POOL_MAX_CAP".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.initial_cap > self.max_cap {
            return Err(ConfigError::Invalid {
                key: "POOL_INITIAL_CAP".into(),
                message: format!("{} exceeds POOL_MAX_CAP={}", self.initial_cap, self.max_cap),
            });
        }
        Ok(())
    }
}
