//! The roulette: a long-running reserve → delete → dispatch loop.
//!
//! ```text
//!            ┌──────────────┐  open ok   ┌──────────────┐
//!   start ──►│ Disconnected │───────────►│    Idle      │◄─────────────┐
//!            └──────────────┘            └──────┬───────┘              │
//!                 ▲    │ open failed:           │ tubes from registry  │
//!                 │    └ backoff wait           ▼                      │
//!                 │                      ┌──────────────┐  timed out:  │
//!                 │      any other error │  Reserving   │──pause base──┤
//!                 └──────────────────────┤              │              │
//!                                        └──────┬───────┘              │
//!                                               │ job                  │
//!                                               ▼                      │
//!                                        stats-job, delete, spawn ─────┘
//! ```
//!
//! Delivery is at-most-once: the job is deleted before its handler runs.

use std::fmt;
use std::ops::ControlFlow;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backoff::Backoff;
use super::registry::HandlerRegistry;
use crate::error::{Error, Result};
use crate::pool::ConnectionFactory;
use crate::protocol::{Connection, ProtocolError};

/// Slack on top of the reserve timeout before a silent socket counts as
/// dead.
const RESERVE_GRACE: Duration = Duration::from_secs(5);

/// Upper bound for stats-job and delete on the dedicated connection.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Counters {
    connect_attempts: AtomicU64,
    connects: AtomicU64,
    faults: AtomicU64,
    reserve_timeouts: AtomicU64,
    dispatched: AtomicU64,
    dropped: AtomicU64,
    handler_panics: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the loop's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouletteStats {
    /// Calls to the connection factory.
    pub connect_attempts: u64,
    /// Successful connects (the first one included).
    pub connects: u64,
    /// Connection faults that forced a reconnect.
    pub faults: u64,
    /// Reserves that found no job.
    pub reserve_timeouts: u64,
    /// Jobs handed to a handler.
    pub dispatched: u64,
    /// Jobs deleted with no handler registered for their tube.
    pub dropped: u64,
    /// Handlers that panicked.
    pub handler_panics: u64,
}

/// Control over a running roulette.
///
/// Dropping the handle detaches the loop; it then runs until the runtime
/// shuts down.
pub struct RouletteHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
    counters: Arc<Counters>,
}

impl RouletteHandle {
    pub(crate) fn spawn<C: Connection>(
        factory: ConnectionFactory<C>,
        registry: Arc<HandlerRegistry>,
        running: Arc<AtomicBool>,
        restart_interval: Duration,
        reserve_timeout: Duration,
    ) -> Result<Self> {
        if running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::RouletteRunning);
        }

        let (stop, stop_rx) = watch::channel(false);
        let counters = Arc::new(Counters::default());
        let roulette = Roulette {
            factory,
            registry,
            restart_interval,
            reserve_timeout,
            counters: Arc::clone(&counters),
            stop: stop_rx,
            _running: RunningGuard(running),
        };

        Ok(Self {
            stop,
            task: tokio::spawn(roulette.run()),
            counters,
        })
    }

    pub fn stats(&self) -> RouletteStats {
        let c = &self.counters;
        RouletteStats {
            connect_attempts: c.connect_attempts.load(Ordering::Relaxed),
            connects: c.connects.load(Ordering::Relaxed),
            faults: c.faults.load(Ordering::Relaxed),
            reserve_timeouts: c.reserve_timeouts.load(Ordering::Relaxed),
            dispatched: c.dispatched.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            handler_panics: c.handler_panics.load(Ordering::Relaxed),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the loop, interrupting a reserve or a reconnect wait, and
    /// close its connection. Handlers already spawned keep running.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "roulette task failed");
        }
    }
}

/// Clears the butler's one-roulette flag when the loop ends.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Why the dedicated connection was given up.
enum Fault {
    Reserve(ProtocolError),
    StatsJob(u64, ProtocolError),
    Delete(u64, ProtocolError),
    Stalled(&'static str, Duration),
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Reserve(e) => write!(f, "reserve failed: {}", e),
            Fault::StatsJob(id, e) => write!(f, "stats-job {} failed: {}", id, e),
            Fault::Delete(id, e) => write!(f, "delete {} failed: {}", id, e),
            Fault::Stalled(cmd, after) => {
                write!(f, "{} got no reply within {}s", cmd, after.as_secs())
            }
        }
    }
}

struct Roulette<C: Connection> {
    factory: ConnectionFactory<C>,
    registry: Arc<HandlerRegistry>,
    restart_interval: Duration,
    reserve_timeout: Duration,
    counters: Arc<Counters>,
    stop: watch::Receiver<bool>,
    _running: RunningGuard,
}

impl<C: Connection> Roulette<C> {
    async fn run(mut self) {
        let Some(mut conn) = self.reconnect().await else {
            return;
        };

        loop {
            let tubes = self.registry.tubes();
            if tubes.is_empty() {
                // Reserving on "default" would delete jobs nobody handles.
                if self.pause(self.restart_interval).await.is_break() {
                    break;
                }
                continue;
            }

            let limit = self.reserve_timeout + RESERVE_GRACE;
            let reserved = tokio::select! {
                r = tokio::time::timeout(limit, conn.reserve(&tubes, self.reserve_timeout)) => r,
                _ = stopped(&mut self.stop) => break,
            };

            let fault = match reserved {
                Ok(Ok((id, body))) => self.dispatch(&mut conn, id, body).await.err(),
                Ok(Err(e)) if e.is_timeout() => {
                    Counters::bump(&self.counters.reserve_timeouts);
                    debug!(tubes = ?tubes, "no job ready");
                    if self.pause(self.restart_interval).await.is_break() {
                        break;
                    }
                    None
                }
                Ok(Err(e)) => Some(Fault::Reserve(e)),
                Err(_) => Some(Fault::Stalled("reserve", limit)),
            };

            if let Some(fault) = fault {
                Counters::bump(&self.counters.faults);
                warn!(error = %fault, "roulette connection lost, reconnecting");
                drop(conn);
                conn = match self.reconnect().await {
                    Some(conn) => conn,
                    None => return,
                };
            }
        }

        if let Err(e) = self.factory.close(conn).await {
            debug!(error = %e, "closing roulette connection failed");
        }
        info!("roulette stopped");
    }

    /// Delete the reserved job and hand its body to the tube's handler.
    async fn dispatch(&self, conn: &mut C, id: u64, body: Bytes) -> std::result::Result<(), Fault> {
        let stats = tokio::time::timeout(COMMAND_TIMEOUT, conn.stats_job(id))
            .await
            .map_err(|_| Fault::Stalled("stats-job", COMMAND_TIMEOUT))?
            .map_err(|e| Fault::StatsJob(id, e))?;

        tokio::time::timeout(COMMAND_TIMEOUT, conn.delete(id))
            .await
            .map_err(|_| Fault::Stalled("delete", COMMAND_TIMEOUT))?
            .map_err(|e| Fault::Delete(id, e))?;

        let tube = stats.get("tube").cloned().unwrap_or_default();
        let Some(handler) = self.registry.get(&tube) else {
            Counters::bump(&self.counters.dropped);
            warn!(tube = %tube, job_id = id, "no handler registered, job dropped");
            return Ok(());
        };

        Counters::bump(&self.counters.dispatched);
        debug!(tube = %tube, job_id = id, bytes = body.len(), "job dispatched");

        let counters = Arc::clone(&self.counters);
        tokio::spawn(async move {
            if AssertUnwindSafe(handler.call(body)).catch_unwind().await.is_err() {
                Counters::bump(&counters.handler_panics);
                error!(tube = %tube, job_id = id, "handler panicked");
            }
        });
        Ok(())
    }

    /// Dial until a connection comes up or a stop is requested.
    async fn reconnect(&mut self) -> Option<C> {
        let mut backoff = Backoff::new(self.restart_interval);
        loop {
            let attempt = backoff.attempt();
            let wait = backoff.next_wait();
            Counters::bump(&self.counters.connect_attempts);

            let opened = tokio::select! {
                r = self.factory.open() => r,
                _ = stopped(&mut self.stop) => return None,
            };

            match opened {
                Ok(conn) => {
                    Counters::bump(&self.counters.connects);
                    info!(attempt, "roulette connected");
                    return Some(conn);
                }
                Err(e) => {
                    warn!(
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "roulette connect failed"
                    );
                }
            }

            if self.pause(wait).await.is_break() {
                return None;
            }
        }
    }

    /// Sleep unless a stop arrives first.
    async fn pause(&mut self, period: Duration) -> ControlFlow<()> {
        tokio::select! {
            _ = tokio::time::sleep(period) => ControlFlow::Continue(()),
            _ = stopped(&mut self.stop) => ControlFlow::Break(()),
        }
    }
}

/// Resolve once a stop is requested. A dropped handle never stops the loop.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
