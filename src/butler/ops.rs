//! Pool-mediated queue operations.
//!
//! Every operation checks out one connection, issues its command(s), and
//! then releases the connection on success or discards it on failure. A
//! failed connection is never handed to the next caller. A call dropped
//! mid-command gives its slot back through the [`Pooled`] guard. Nothing
//! here retries; that is the caller's call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use super::stats::TubeStats;
use super::{Butler, Handler, JobCategory, PutOptions, RouletteHandle};
use crate::error::Result;
use crate::pool::Pooled;
use crate::protocol::{Connection, ProtocolError, ProtocolResult};

impl<C: Connection> Butler<C> {
    /// Return `conn` to the pool according to `result`, then surface it.
    async fn settle<T>(&self, conn: Pooled<C>, result: ProtocolResult<T>) -> Result<T> {
        match result {
            Ok(value) => {
                if let Err(e) = self.pool.release(conn).await {
                    debug!(error = %e, "connection not returned to pool");
                }
                Ok(value)
            }
            Err(e) => {
                if let Err(discard_err) = self.pool.discard(conn).await {
                    debug!(error = %discard_err, "discarding connection failed");
                }
                Err(e.into())
            }
        }
    }

    /// Put `body` into `tube` with priority 0, no delay and ttr 0.
    pub async fn put_job(&self, tube: &str, body: impl AsRef<[u8]>) -> Result<u64> {
        self.put_job_with(tube, body, PutOptions::default()).await
    }

    pub async fn put_job_with(
        &self,
        tube: &str,
        body: impl AsRef<[u8]>,
        options: PutOptions,
    ) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        let result = conn
            .put(tube, body.as_ref(), options.priority, options.delay, options.ttr)
            .await;
        self.settle(conn, result).await
    }

    pub async fn bury_job(&self, id: u64, priority: u32) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        let result = conn.bury(id, priority).await;
        self.settle(conn, result).await
    }

    /// Kick up to `bound` jobs in `tube`, returning how many moved.
    pub async fn kick_job(&self, tube: &str, bound: u32) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        let result = conn.kick(tube, bound).await;
        self.settle(conn, result).await
    }

    pub async fn touch(&self, id: u64) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        let result = conn.touch(id).await;
        self.settle(conn, result).await
    }

    pub async fn peek(&self, id: u64) -> Result<Bytes> {
        let mut conn = self.pool.acquire().await?;
        let result = conn.peek(id).await;
        self.settle(conn, result).await
    }

    /// Reserve one job from `tube` only.
    ///
    /// The reservation belongs to the pooled connection it was made on, so
    /// the job goes back to ready if that connection is later closed.
    pub async fn reserve_job_by_tube(&self, tube: &str, timeout: Duration) -> Result<(u64, Bytes)> {
        let mut conn = self.pool.acquire().await?;
        let result = conn.reserve(&[tube.to_string()], timeout).await;
        self.settle(conn, result).await
    }

    /// Names of every tube on the server.
    pub async fn tube_names(&self) -> Result<Vec<String>> {
        let mut conn = self.pool.acquire().await?;
        let result = conn.list_tubes().await;
        self.settle(conn, result).await
    }

    /// Delete the oldest job of `tube` in `category`, returning its id.
    pub async fn delete_job_by_category(&self, tube: &str, category: JobCategory) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        let result = async {
            let job = conn.peek_state(tube, category.into()).await?;
            conn.delete(job.id).await?;
            Ok::<_, ProtocolError>(job.id)
        }
        .await;
        self.settle(conn, result).await
    }

    /// Counters of `tube`, verified to belong to it.
    pub async fn stats_for_tube(&self, tube: &str) -> Result<TubeStats> {
        let mut conn = self.pool.acquire().await?;
        let result = conn.stats_tube(tube).await;
        let stats = self.settle(conn, result).await?;
        TubeStats::from_server_stats(tube, &stats)
    }

    /// Raw `stats-job` dictionary.
    pub async fn stats_job_by_id(&self, id: u64) -> Result<HashMap<String, String>> {
        let mut conn = self.pool.acquire().await?;
        let result = conn.stats_job(id).await;
        self.settle(conn, result).await
    }

    /// Stats of every tube in `list-tubes` order.
    ///
    /// A tube that disappears between the listing and its stats call is
    /// skipped.
    pub async fn all_tube_stats(&self) -> Result<Vec<TubeStats>> {
        let mut all = Vec::new();
        for tube in self.tube_names().await? {
            match self.stats_for_tube(&tube).await {
                Ok(stats) => all.push(stats),
                Err(e) if e.is_not_found() => {
                    warn!(tube = %tube, "tube vanished while collecting stats");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(all)
    }

    /// Add or replace handlers. A running roulette picks them up on its
    /// next reserve cycle.
    pub fn register_handlers<I, K>(&self, handlers: I)
    where
        I: IntoIterator<Item = (K, Handler)>,
        K: Into<String>,
    {
        self.registry.register(handlers);
    }

    /// Start the dispatch loop on its own task.
    ///
    /// `restart_interval` is the base of the reconnect backoff and the pause
    /// after an empty reserve; `reserve_timeout` bounds each reserve.
    pub fn start_roulette(
        &self,
        restart_interval: Duration,
        reserve_timeout: Duration,
    ) -> Result<RouletteHandle> {
        RouletteHandle::spawn(
            self.factory.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.roulette_running),
            restart_interval,
            reserve_timeout,
        )
    }
}
