//! Bounded connection pool with idle eviction.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info};

use super::error::{PoolError, PoolResult};
use super::factory::ConnectionFactory;
use super::pooled::{PoolSlot, Pooled};
use super::ConnectionPool;
use crate::config::PoolConfig;
use crate::protocol::Connection;

/// An idle connection and when it was returned.
struct IdleConnection<C> {
    conn: C,
    since: Instant,
}

/// A pool of at most `max_cap` live connections.
///
/// Each checked-out connection carries a [`PoolSlot`] holding one semaphore
/// permit. Idle connections are handed out oldest first and closed instead
/// if they sat longer than `idle_timeout`.
///
/// The `closed` flag is only flipped and checked while the idle queue is
/// locked, so a release racing `drain` never parks a connection in a
/// drained pool.
pub struct ChannelPool<C: Connection> {
    factory: ConnectionFactory<C>,
    idle: Mutex<VecDeque<IdleConnection<C>>>,
    permits: Arc<Semaphore>,
    config: PoolConfig,
    in_use: Arc<AtomicUsize>,
    closed: AtomicBool,
}

impl<C: Connection> ChannelPool<C> {
    /// Create a pool and eagerly open `initial_cap` connections.
    pub async fn new(factory: ConnectionFactory<C>, config: PoolConfig) -> PoolResult<Self> {
        let mut idle = VecDeque::with_capacity(config.max_cap);
        for _ in 0..config.initial_cap {
            let conn = factory.open().await?;
            idle.push_back(IdleConnection {
                conn,
                since: Instant::now(),
            });
        }

        info!(
            initial = config.initial_cap,
            max = config.max_cap,
            "connection pool created"
        );

        Ok(Self {
            factory,
            idle: Mutex::new(idle),
            permits: Arc::new(Semaphore::new(config.max_cap)),
            config,
            in_use: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
        })
    }

    /// Maximum number of live connections.
    pub fn capacity(&self) -> usize {
        self.config.max_cap
    }

    fn lock_idle(&self) -> MutexGuard<'_, VecDeque<IdleConnection<C>>> {
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_stale(&self, idle: &IdleConnection<C>) -> bool {
        self.config
            .idle_timeout
            .is_some_and(|limit| idle.since.elapsed() > limit)
    }

    async fn close_quietly(&self, conn: C) {
        if let Err(e) = self.factory.close(conn).await {
            debug!(error = %e, "error closing pooled connection");
        }
    }
}

#[async_trait]
impl<C: Connection> ConnectionPool for ChannelPool<C> {
    type Conn = C;

    async fn acquire(&self) -> PoolResult<Pooled<C>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PoolError::Closed);
        }

        let started = Instant::now();
        let permit = match tokio::time::timeout(
            self.config.acquire_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                return Err(PoolError::Exhausted {
                    capacity: self.config.max_cap,
                    waited: started.elapsed(),
                })
            }
        };

        loop {
            let candidate = self.lock_idle().pop_front();
            match candidate {
                Some(idle) if self.is_stale(&idle) => {
                    debug!("evicting idle connection");
                    self.close_quietly(idle.conn).await;
                }
                Some(idle) => {
                    let slot = PoolSlot::new(permit, Arc::clone(&self.in_use));
                    return Ok(Pooled::new(idle.conn, slot));
                }
                None => break,
            }
        }

        // Permit is returned on drop if the dial fails
        let conn = self.factory.open().await?;
        let slot = PoolSlot::new(permit, Arc::clone(&self.in_use));
        Ok(Pooled::new(conn, slot))
    }

    async fn release(&self, pooled: Pooled<C>) -> PoolResult<()> {
        let (conn, slot) = pooled.into_parts();

        let rejected = {
            let mut idle = self.lock_idle();
            if self.closed.load(Ordering::SeqCst) {
                Some(conn)
            } else {
                idle.push_back(IdleConnection {
                    conn,
                    since: Instant::now(),
                });
                None
            }
        };
        drop(slot);

        match rejected {
            Some(conn) => {
                self.close_quietly(conn).await;
                Err(PoolError::Closed)
            }
            None => Ok(()),
        }
    }

    async fn discard(&self, pooled: Pooled<C>) -> PoolResult<()> {
        let (conn, _slot) = pooled.into_parts();
        self.close_quietly(conn).await;
        Ok(())
    }

    async fn drain(&self) {
        let idle: Vec<_> = {
            let mut idle = self.lock_idle();
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            idle.drain(..).collect()
        };
        self.permits.close();

        info!(idle = idle.len(), "draining connection pool");
        for entry in idle {
            self.close_quietly(entry.conn).await;
        }
    }

    fn size(&self) -> usize {
        self.lock_idle().len()
    }

    fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }
}
