//! Connection pool error types.

use std::fmt;
use std::time::Duration;

use crate::protocol::ProtocolError;

/// Errors that can occur during pool operations.
#[derive(Debug)]
pub enum PoolError {
    /// Every connection is checked out and none came back in time.
    Exhausted {
        /// Maximum number of live connections.
        capacity: usize,
        /// How long the caller waited.
        waited: Duration,
    },

    /// The pool has been drained.
    Closed,

    /// Opening a new connection failed.
    Connect(ProtocolError),
}

impl PoolError {
    /// Check if this is an exhaustion error.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, PoolError::Exhausted { .. })
    }

    /// Check if the pool was closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, PoolError::Closed)
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::Exhausted { capacity, waited } => {
                write!(
                    f,
                    "pool exhausted: {} connections busy after {}ms",
                    capacity,
                    waited.as_millis()
                )
            }
            PoolError::Closed => write!(f, "pool has been closed"),
            PoolError::Connect(e) => write!(f, "failed to open connection: {}", e),
        }
    }
}

impl std::error::Error for PoolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PoolError::Connect(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ProtocolError> for PoolError {
    fn from(e: ProtocolError) -> Self {
        PoolError::Connect(e)
    }
}

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;
