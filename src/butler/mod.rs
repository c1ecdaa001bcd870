//! The butler: pooled queue operations plus the roulette dispatch loop.
//!
//! # Architecture
//!
//! ```text
//!   callers ──put/peek/stats──► Butler ──acquire/release──► ConnectionPool
//!                                  │
//!                    register ─────┤ HandlerRegistry (RwLock)
//!                                  │
//!                    start_roulette└──► Roulette task ── owns one connection
//!                                          │  reserve → stats-job → delete
//!                                          ▼
//!                                   spawn handler(body)
//! ```
//!
//! The roulette's connection never enters the pool, so a reserve blocking
//! for seconds never holds up producers.

mod backoff;
mod ops;
mod registry;
mod roulette;
mod stats;

pub use backoff::{jitter, next_factor, Backoff};
pub use registry::{Handler, HandlerRegistry};
pub use roulette::{RouletteHandle, RouletteStats};
pub use stats::{render_table, TubeStats};

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::pool::{ChannelPool, ConnectionFactory, ConnectionPool};
use crate::protocol::{BeanstalkConnection, Connection, JobState};

/// Which state `delete_job_by_category` removes the oldest job from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobCategory {
    Buried,
    Ready,
    Delayed,
}

impl JobCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobCategory::Buried => "buried",
            JobCategory::Ready => "ready",
            JobCategory::Delayed => "delayed",
        }
    }
}

impl FromStr for JobCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "buried" => Ok(JobCategory::Buried),
            "ready" => Ok(JobCategory::Ready),
            "delayed" => Ok(JobCategory::Delayed),
            other => Err(Error::InvalidCategory(other.to_string())),
        }
    }
}

impl fmt::Display for JobCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<JobCategory> for JobState {
    fn from(category: JobCategory) -> Self {
        match category {
            JobCategory::Buried => JobState::Buried,
            JobCategory::Ready => JobState::Ready,
            JobCategory::Delayed => JobState::Delayed,
        }
    }
}

/// Parameters of `put`. The default matches `put_job`: priority 0, no
/// delay, ttr 0 (the server raises it to one second).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub priority: u32,
    pub delay: Duration,
    pub ttr: Duration,
}

/// Queue manager: pool-mediated operations and the dispatch loop.
///
/// Cloning is cheap; clones share the pool, the registry and the
/// one-roulette-at-a-time guard.
pub struct Butler<C: Connection> {
    factory: ConnectionFactory<C>,
    pool: Arc<dyn ConnectionPool<Conn = C>>,
    registry: Arc<HandlerRegistry>,
    roulette_running: Arc<AtomicBool>,
}

impl<C: Connection> Clone for Butler<C> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            pool: Arc::clone(&self.pool),
            registry: Arc::clone(&self.registry),
            roulette_running: Arc::clone(&self.roulette_running),
        }
    }
}

impl<C: Connection> Butler<C> {
    /// Assemble a butler from a factory (used by the roulette) and a pool
    /// (used by every other operation).
    pub fn new<P>(factory: ConnectionFactory<C>, pool: P) -> Self
    where
        P: ConnectionPool<Conn = C> + 'static,
    {
        Self {
            factory,
            pool: Arc::new(pool),
            registry: Arc::new(HandlerRegistry::new()),
            roulette_running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Idle connections in the pool.
    pub fn idle_connections(&self) -> usize {
        self.pool.size()
    }

    /// Connections currently checked out of the pool.
    pub fn busy_connections(&self) -> usize {
        self.pool.in_use()
    }

    /// Drain the pool. A running roulette is unaffected; stop it through
    /// its handle.
    pub async fn close(&self) {
        self.pool.drain().await;
    }
}

impl Butler<BeanstalkConnection> {
    /// Connect to the beanstalkd server named in `config`.
    pub async fn connect(config: &Config) -> Result<Self> {
        let factory = ConnectionFactory::beanstalk(config.addr.clone());
        let pool = ChannelPool::new(factory.clone(), config.pool.clone()).await?;
        Ok(Self::new(factory, pool))
    }
}
