//! Checked-out connection guard.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::OwnedSemaphorePermit;

/// One unit of pool capacity held by a checked-out connection.
///
/// Dropping the slot returns its permit and lowers the pool's in-use
/// count, whether the connection went back through `release`/`discard`
/// or its owner was cancelled mid-command.
pub struct PoolSlot {
    _permit: OwnedSemaphorePermit,
    in_use: Arc<AtomicUsize>,
}

impl PoolSlot {
    pub fn new(permit: OwnedSemaphorePermit, in_use: Arc<AtomicUsize>) -> Self {
        in_use.fetch_add(1, Ordering::SeqCst);
        Self {
            _permit: permit,
            in_use,
        }
    }
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        self.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A connection on loan from a pool.
///
/// Derefs to the connection. If the guard is dropped without being handed
/// back, the connection is closed by its own `Drop` and the capacity it
/// held is returned.
pub struct Pooled<C> {
    conn: C,
    slot: PoolSlot,
}

impl<C> Pooled<C> {
    pub fn new(conn: C, slot: PoolSlot) -> Self {
        Self { conn, slot }
    }

    /// Split into the connection and the capacity it holds.
    pub fn into_parts(self) -> (C, PoolSlot) {
        (self.conn, self.slot)
    }
}

impl<C> Deref for Pooled<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.conn
    }
}

impl<C> DerefMut for Pooled<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.conn
    }
}
