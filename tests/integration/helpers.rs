//! Test helpers and utilities

use std::time::Duration;

use bstk_butler::config::PoolConfig;
use bstk_butler::pool::{ChannelPool, ConnectionFactory};
use bstk_butler::protocol::{MemoryConnection, MemoryServer};
use bstk_butler::{Butler, Handler};
use bytes::Bytes;
use tokio::sync::mpsc;

/// A butler wired to a fresh in-memory server.
pub struct TestButler {
    pub server: MemoryServer,
    pub butler: Butler<MemoryConnection>,
}

#[allow(dead_code)]
impl TestButler {
    pub async fn new() -> Self {
        Self::with_pool(PoolConfig {
            initial_cap: 0,
            max_cap: 4,
            idle_timeout: Some(Duration::from_secs(60)),
            acquire_timeout: Duration::from_secs(1),
        })
        .await
    }

    pub async fn with_pool(config: PoolConfig) -> Self {
        let server = MemoryServer::new();
        let factory = ConnectionFactory::memory(server.clone());
        let pool = ChannelPool::new(factory.clone(), config)
            .await
            .expect("Failed to build pool");

        Self {
            server,
            butler: Butler::new(factory, pool),
        }
    }

    /// Ready count of `tube` as a number.
    pub async fn ready(&self, tube: &str) -> u64 {
        self.butler
            .stats_for_tube(tube)
            .await
            .expect("stats-tube failed")
            .ready
            .parse()
            .expect("ready count is numeric")
    }
}

/// Handler that forwards every body into a channel.
pub fn capture_handler() -> (Handler, mpsc::UnboundedReceiver<Bytes>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = Handler::new(move |body| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(body);
        }
    });
    (handler, rx)
}

/// Receive one body, failing the test after `secs` (virtual or real) seconds.
pub async fn recv_within(rx: &mut mpsc::UnboundedReceiver<Bytes>, secs: u64) -> Bytes {
    tokio::time::timeout(Duration::from_secs(secs), rx.recv())
        .await
        .expect("handler was not invoked in time")
        .expect("handler channel closed")
}

/// Assert nothing more arrives within `secs`.
pub async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<Bytes>, secs: u64) {
    if let Ok(Some(body)) = tokio::time::timeout(Duration::from_secs(secs), rx.recv()).await {
        panic!("unexpected extra delivery: {:?}", body);
    }
}
