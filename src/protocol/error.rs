//! Queue protocol error types.

use std::fmt;
use std::io;

/// Errors reported by a queue server or raised while talking to one.
#[derive(Debug)]
pub enum ProtocolError {
    /// The job or tube does not exist (or is not in the required state).
    NotFound,
    /// `reserve-with-timeout` expired with no job available.
    TimedOut,
    /// A job reserved by this connection is about to hit its TTR.
    DeadlineSoon,
    /// The server buried the job instead of accepting it (out of memory).
    Buried(u64),
    /// Job body exceeds the server's `max-job-size`.
    JobTooBig,
    /// Job body was not followed by CRLF.
    ExpectedCrlf,
    /// The server is draining and refuses new jobs.
    Draining,
    /// Attempted to ignore the only watched tube.
    NotIgnored,
    /// Server ran out of memory.
    OutOfMemory,
    /// Server-side bug.
    InternalError,
    /// Malformed command.
    BadFormat,
    /// Server did not recognize the command.
    UnknownCommand,
    /// Tube name rejected before it reached the wire.
    InvalidTubeName(String),
    /// Reply line that does not fit the command that was sent.
    UnexpectedReply(String),
    /// The peer closed the connection.
    ConnectionClosed,
    /// Socket-level failure.
    Io(io::Error),
}

impl ProtocolError {
    /// Map a bare server error line to its variant.
    ///
    /// Returns `None` for lines that are not one of the generic replies.
    pub(crate) fn from_reply(line: &str) -> Option<Self> {
        let err = match line {
            "NOT_FOUND" => ProtocolError::NotFound,
            "TIMED_OUT" => ProtocolError::TimedOut,
            "DEADLINE_SOON" => ProtocolError::DeadlineSoon,
            "JOB_TOO_BIG" => ProtocolError::JobTooBig,
            "EXPECTED_CRLF" => ProtocolError::ExpectedCrlf,
            "DRAINING" => ProtocolError::Draining,
            "NOT_IGNORED" => ProtocolError::NotIgnored,
            "OUT_OF_MEMORY" => ProtocolError::OutOfMemory,
            "INTERNAL_ERROR" => ProtocolError::InternalError,
            "BAD_FORMAT" => ProtocolError::BadFormat,
            "UNKNOWN_COMMAND" => ProtocolError::UnknownCommand,
            _ => return None,
        };
        Some(err)
    }

    /// Check if this is a reserve timeout (no work available).
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProtocolError::TimedOut)
    }

    /// Check if the job or tube was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProtocolError::NotFound)
    }

    /// Check if the connection itself is unusable.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, ProtocolError::ConnectionClosed | ProtocolError::Io(_))
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::NotFound => write!(f, "not found"),
            ProtocolError::TimedOut => write!(f, "reserve-with-timeout: timeout"),
            ProtocolError::DeadlineSoon => write!(f, "deadline soon"),
            ProtocolError::Buried(id) => write!(f, "job {} buried by server", id),
            ProtocolError::JobTooBig => write!(f, "job too big"),
            ProtocolError::ExpectedCrlf => write!(f, "expected CRLF after job body"),
            ProtocolError::Draining => write!(f, "server is draining"),
            ProtocolError::NotIgnored => write!(f, "cannot ignore the only watched tube"),
            ProtocolError::OutOfMemory => write!(f, "server out of memory"),
            ProtocolError::InternalError => write!(f, "server internal error"),
            ProtocolError::BadFormat => write!(f, "bad command format"),
            ProtocolError::UnknownCommand => write!(f, "unknown command"),
            ProtocolError::InvalidTubeName(name) => write!(f, "invalid tube name: {:?}", name),
            ProtocolError::UnexpectedReply(line) => write!(f, "unexpected reply: {}", line),
            ProtocolError::ConnectionClosed => write!(f, "connection closed"),
            ProtocolError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProtocolError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ProtocolError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ProtocolError::ConnectionClosed
        } else {
            ProtocolError::Io(e)
        }
    }
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_reply() {
        assert!(ProtocolError::from_reply("NOT_FOUND").unwrap().is_not_found());
        assert!(ProtocolError::from_reply("TIMED_OUT").unwrap().is_timeout());
        assert!(matches!(
            ProtocolError::from_reply("DRAINING"),
            Some(ProtocolError::Draining)
        ));
        assert!(ProtocolError::from_reply("INSERTED 1").is_none());
    }

    #[test]
    fn test_eof_is_connection_closed() {
        let err: ProtocolError = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        assert!(matches!(err, ProtocolError::ConnectionClosed));
        assert!(err.is_connection_error());

        let err: ProtocolError = io::Error::new(io::ErrorKind::ConnectionReset, "reset").into();
        assert!(err.is_connection_error());
        assert!(err.to_string().contains("reset"));
    }

    #[test]
    fn test_timeout_display_matches_server_wording() {
        assert!(ProtocolError::TimedOut.to_string().contains("timeout"));
    }
}
