//! Injected connection open/close functions.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::protocol::{BeanstalkConnection, Connection, MemoryConnection, MemoryServer, ProtocolResult};

type OpenFn<C> = dyn Fn() -> BoxFuture<'static, ProtocolResult<C>> + Send + Sync;
type CloseFn<C> = dyn Fn(C) -> BoxFuture<'static, ProtocolResult<()>> + Send + Sync;

/// A pair of functions that open and close server connections.
///
/// Shared by the pool (ad-hoc operations) and the roulette (its dedicated
/// connection), so both always dial the same server the same way.
pub struct ConnectionFactory<C> {
    open: Arc<OpenFn<C>>,
    close: Arc<CloseFn<C>>,
}

impl<C> Clone for ConnectionFactory<C> {
    fn clone(&self) -> Self {
        Self {
            open: Arc::clone(&self.open),
            close: Arc::clone(&self.close),
        }
    }
}

impl<C: Connection> ConnectionFactory<C> {
    /// Build a factory from arbitrary open/close functions.
    pub fn new<O, OFut, X, XFut>(open: O, close: X) -> Self
    where
        O: Fn() -> OFut + Send + Sync + 'static,
        OFut: Future<Output = ProtocolResult<C>> + Send + 'static,
        X: Fn(C) -> XFut + Send + Sync + 'static,
        XFut: Future<Output = ProtocolResult<()>> + Send + 'static,
    {
        Self {
            open: Arc::new(move || open().boxed()),
            close: Arc::new(move |conn| close(conn).boxed()),
        }
    }

    /// Open a new connection.
    pub async fn open(&self) -> ProtocolResult<C> {
        (self.open)().await
    }

    /// Close a connection.
    pub async fn close(&self, conn: C) -> ProtocolResult<()> {
        (self.close)(conn).await
    }
}

impl ConnectionFactory<BeanstalkConnection> {
    /// Dial `addr` over TCP; close with `quit`.
    pub fn beanstalk(addr: impl Into<String>) -> Self {
        let addr: Arc<str> = Arc::from(addr.into());
        Self::new(
            move || {
                let addr = Arc::clone(&addr);
                async move { BeanstalkConnection::connect(&addr).await }
            },
            |mut conn: BeanstalkConnection| async move { conn.quit().await },
        )
    }
}

impl ConnectionFactory<MemoryConnection> {
    /// Connect to an in-process server.
    pub fn memory(server: MemoryServer) -> Self {
        Self::new(
            move || {
                let server = server.clone();
                async move { server.connect().await }
            },
            |mut conn: MemoryConnection| async move { conn.quit().await },
        )
    }
}
