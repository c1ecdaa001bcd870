//! Crate-level error type.

use std::fmt;

use crate::pool::PoolError;
use crate::protocol::ProtocolError;

/// Errors surfaced by [`Butler`](crate::Butler) operations.
#[derive(Debug)]
pub enum Error {
    /// Checking out a connection failed.
    Pool(PoolError),

    /// The server rejected the command or the connection broke.
    Protocol(ProtocolError),

    /// `stats-tube` answered for a different tube than requested.
    StatsMismatch { requested: String, reported: String },

    /// Unknown job category (expected buried, ready or delayed).
    InvalidCategory(String),

    /// A roulette loop is already running for this butler.
    RouletteRunning,
}

impl Error {
    /// Check if the server reported NOT_FOUND.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Protocol(e) if e.is_not_found())
    }

    /// Check if a reserve timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Protocol(e) if e.is_timeout())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Pool(e) => write!(f, "pool: {}", e),
            Error::Protocol(e) => write!(f, "protocol: {}", e),
            Error::StatsMismatch {
                requested,
                reported,
            } => write!(
                f,
                "unable to retrieve tube stats: asked for '{}', server answered for '{}'",
                requested, reported
            ),
            Error::InvalidCategory(c) => {
                write!(f, "invalid job category '{}' (expected buried, ready or delayed)", c)
            }
            Error::RouletteRunning => write!(f, "roulette is already running"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Pool(e) => Some(e),
            Error::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PoolError> for Error {
    fn from(e: PoolError) -> Self {
        Error::Pool(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

/// Result type alias for butler operations.
pub type Result<T> = std::result::Result<T, Error>;
