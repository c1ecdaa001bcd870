//! Configuration loaded from environment variables.
//!
//! # Example
//!
//! ```rust,ignore
//! use bstk_butler::config::Config;
//!
//! let config = Config::from_env()?;
//! println!("Server: {}", config.addr);
//! println!("Pool max: {}", config.pool.max_cap);
//! ```

mod error;
mod logging;
mod parse;
mod pool;
mod roulette;

pub use error::ConfigError;
pub use logging::{LogFormat, LoggingConfig};
pub use pool::PoolConfig;
pub use roulette::RouletteConfig;

use parse::env_or;

/// Default beanstalkd address.
pub const DEFAULT_ADDR: &str = "127.0.0.1:11300";

/// Complete application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Beanstalkd address (`host:port`).
    pub addr: String,
    /// Connection pool configuration.
    pub pool: PoolConfig,
    /// Dispatch loop configuration.
    pub roulette: RouletteConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            pool: PoolConfig::default(),
            roulette: RouletteConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let addr = env_or("BSTK_ADDR", DEFAULT_ADDR);
        if !addr.contains(':') {
            return Err(ConfigError::Invalid {
                key: "BSTK_ADDR".into(),
                message: format!("'{}' is not host:port", addr),
            });
        }

        Ok(Self {
            addr,
            pool: PoolConfig::from_env()?,
            roulette: RouletteConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
        })
    }

    /// Print configuration summary to log.
    pub fn log_summary(&self) {
        use tracing::info;

        info!("Configuration loaded:");
        info!("  Beanstalkd: {}", self.addr);
        info!(
            "  Pool: initial={} max={}",
            self.pool.initial_cap, self.pool.max_cap
        );

        match self.pool.idle_timeout {
            Some(idle) => info!("  Pool idle timeout: {:?}", idle),
            None => info!("  Pool idle timeout: disabled"),
        }

        info!("  Acquire timeout: {:?}", self.pool.acquire_timeout);
        info!(
            "  Roulette: restart={:?} reserve={:?}",
            self.roulette.restart_interval, self.roulette.reserve_timeout
        );
        info!("  Log format: {}", self.logging.format);
    }
}
