//! Connection pooling for ad-hoc queue operations.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      ChannelPool                           │
//! ├────────────────────────────────────────────────────────────┤
//! │  idle: VecDeque<(conn, since)>      permits: Semaphore     │
//! │       │                                   │                │
//! │       ▼                                   ▼                │
//! │   acquire() ── pop idle / evict stale / dial via factory   │
//! │   release() ── push back to idle, then drop the slot       │
//! │   discard() ── close via factory, then drop the slot       │
//! │   drain()   ── close idle, reject further acquires         │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every checkout is a [`Pooled`] guard whose [`PoolSlot`] gives the
//! capacity back on drop, so a caller cancelled mid-command cannot leak it.
//!
//! The butler depends only on the [`ConnectionPool`] contract; any pool
//! implementation can be injected.

mod channel;
mod error;
mod factory;
mod pooled;

pub use channel::ChannelPool;
pub use error::{PoolError, PoolResult};
pub use factory::ConnectionFactory;
pub use pooled::{PoolSlot, Pooled};

use async_trait::async_trait;

use crate::protocol::Connection;

/// Contract of a bounded pool of live connections.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// The connection type handed out.
    type Conn: Connection;

    /// Check out a connection, dialing a new one if none is idle.
    async fn acquire(&self) -> PoolResult<Pooled<Self::Conn>>;

    /// Return a healthy connection for reuse.
    async fn release(&self, conn: Pooled<Self::Conn>) -> PoolResult<()>;

    /// Close a connection that may be broken instead of reusing it.
    async fn discard(&self, conn: Pooled<Self::Conn>) -> PoolResult<()>;

    /// Close all idle connections and refuse further checkouts.
    async fn drain(&self);

    /// Number of idle connections.
    fn size(&self) -> usize;

    /// Number of checked-out connections.
    fn in_use(&self) -> usize;
}
