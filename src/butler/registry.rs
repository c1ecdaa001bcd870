//! Tube → handler mapping shared between callers and the roulette.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::warn;

use crate::protocol::validate_tube_name;

type HandlerFn = dyn Fn(Bytes) -> BoxFuture<'static, ()> + Send + Sync;

/// Callback invoked with the body of every job reserved from its tube.
///
/// Handlers are fire-and-forget: the job is already deleted on the server
/// when the handler starts, so a failing handler loses only its own job.
#[derive(Clone)]
pub struct Handler {
    inner: Arc<HandlerFn>,
}

impl Handler {
    /// Wrap an async callback.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            inner: Arc::new(move |body| f(body).boxed()),
        }
    }

    /// Wrap a synchronous callback; it runs on the blocking thread pool.
    pub fn blocking<F>(f: F) -> Self
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::new(move |body| {
            let f = Arc::clone(&f);
            async move {
                if let Err(e) = tokio::task::spawn_blocking(move || f(body)).await {
                    if e.is_panic() {
                        // Surface to the roulette's panic accounting.
                        std::panic::resume_unwind(e.into_panic());
                    }
                }
            }
        })
    }

    pub(crate) fn call(&self, body: Bytes) -> BoxFuture<'static, ()> {
        (self.inner)(body)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler")
    }
}

/// Concurrency-safe tube → handler map.
///
/// Registration takes the write lock; the roulette reads the tube set once
/// per reserve cycle and looks up the handler once per job.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge entries; a tube registered again is overwritten.
    ///
    /// Names the server would reject are skipped with a warning: watching
    /// one would fail every reserve and starve the valid tubes.
    pub fn register<I, K>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, Handler)>,
        K: Into<String>,
    {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        for (tube, handler) in entries {
            let tube = tube.into();
            if let Err(e) = validate_tube_name(&tube) {
                warn!(tube = %tube, error = %e, "handler not registered");
                continue;
            }
            handlers.insert(tube, handler);
        }
    }

    /// Registered tube names, sorted.
    pub fn tubes(&self) -> Vec<String> {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        let mut tubes: Vec<String> = handlers.keys().cloned().collect();
        tubes.sort();
        tubes
    }

    pub fn get(&self, tube: &str) -> Option<Handler> {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(tube)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
