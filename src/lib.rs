//! bstk_butler - a resilience layer over a beanstalkd work queue.
//!
//! Producers and queriers go through a bounded connection pool; consumers
//! register per-tube handlers that a background dispatch loop (the
//! "roulette") feeds. The roulette owns its own connection and rebuilds it
//! with a widening-then-settling backoff whenever the server goes away.
//!
//! # Features
//!
//! - **Pooled operations**: put, bury, kick, touch, peek, reserve, stats
//! - **Runtime registration**: handlers added while the roulette runs are
//!   picked up on its next reserve cycle
//! - **At-most-once dispatch**: jobs are deleted before their handler runs
//! - **Crash isolation**: a panicking handler never takes the loop down
//! - **In-memory server**: [`protocol::MemoryServer`] for tests and demos
//!
//! # Example
//!
//! ```rust,ignore
//! use bstk_butler::{Butler, Config, Handler};
//!
//! let config = Config::from_env()?;
//! let butler = Butler::connect(&config).await?;
//!
//! butler.register_handlers([(
//!     "mail",
//!     Handler::new(|body| async move { println!("{:?}", body) }),
//! )]);
//! let roulette = butler.start_roulette(
//!     config.roulette.restart_interval,
//!     config.roulette.reserve_timeout,
//! )?;
//!
//! butler.put_job("mail", "hello world!").await?;
//! roulette.shutdown().await;
//! ```

/// Package version from Cargo.toml
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Git commit hash (8 chars), empty outside a git checkout
pub const BUILD_VERSION: &str = env!("BUILD_VERSION");

/// Full version string: "0.1.0 (abc12345)"
pub const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("BUILD_VERSION"), ")");

pub mod butler;
pub mod config;
pub mod error;
pub mod logging;
pub mod pool;
pub mod protocol;

// Re-exports for convenience
pub use butler::{Butler, Handler, JobCategory, PutOptions, RouletteHandle, RouletteStats, TubeStats};
pub use config::Config;
pub use error::{Error, Result};
