//! Work-queue protocol layer.
//!
//! The rest of the crate talks to a queue server only through the
//! [`Connection`] trait. Two implementations ship with the crate:
//!
//! - [`BeanstalkConnection`] - beanstalkd text protocol over TCP
//! - [`MemoryConnection`] - in-process server, used by tests and demos
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐      ┌──────────────┐
//! │    Butler    │      │   Roulette   │
//! └──────┬───────┘      └──────┬───────┘
//!        │ pool checkout       │ dedicated
//!        ▼                     ▼
//! ┌─────────────────────────────────────┐
//! │        impl Connection              │
//! ├──────────────────┬──────────────────┤
//! │ BeanstalkConn.   │ MemoryConnection │
//! │ (tokio TCP)      │ (MemoryServer)   │
//! └──────────────────┴──────────────────┘
//! ```

mod client;
mod error;
mod memory;
mod yaml;

pub use client::{BeanstalkConnection, MAX_BODY_LEN};
pub use error::{ProtocolError, ProtocolResult};
pub use memory::{MemoryCommand, MemoryConnection, MemoryServer};

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

/// Name of the tube every connection uses and watches on connect.
pub const DEFAULT_TUBE: &str = "default";

/// Longest tube name accepted by the server.
pub const MAX_TUBE_NAME_LEN: usize = 200;

/// Jobs with a priority below this are counted as urgent.
pub const URGENT_PRIORITY: u32 = 1024;

/// A job as seen by the core.
///
/// The id is assigned by the server; the core never generates ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: u64,
    pub tube: String,
    pub body: Bytes,
}

/// Job state a peek can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Ready,
    Delayed,
    Buried,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Ready => "ready",
            JobState::Delayed => "delayed",
            JobState::Buried => "buried",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(JobState::Ready),
            "delayed" => Ok(JobState::Delayed),
            "buried" => Ok(JobState::Buried),
            other => Err(format!("unknown job state: {}", other)),
        }
    }
}

/// A live connection to a queue server.
///
/// Connections carry per-connection protocol state (the tube used for
/// producing and the watch list for reserving), so every method takes
/// `&mut self`.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Put a job into `tube`, returning the server-assigned id.
    async fn put(
        &mut self,
        tube: &str,
        body: &[u8],
        priority: u32,
        delay: Duration,
        ttr: Duration,
    ) -> ProtocolResult<u64>;

    /// Bury a job reserved by this connection.
    async fn bury(&mut self, id: u64, priority: u32) -> ProtocolResult<()>;

    /// Kick up to `bound` buried (or, if none, delayed) jobs in `tube`.
    async fn kick(&mut self, tube: &str, bound: u32) -> ProtocolResult<u64>;

    /// Request more time for a reserved job.
    async fn touch(&mut self, id: u64) -> ProtocolResult<()>;

    /// Fetch a job body by id.
    async fn peek(&mut self, id: u64) -> ProtocolResult<Bytes>;

    /// Fetch the oldest job of `tube` in `state`.
    async fn peek_state(&mut self, tube: &str, state: JobState) -> ProtocolResult<Job>;

    /// Reserve the next job from exactly the tubes in `tubes`.
    ///
    /// Blocks up to `timeout`; fails with [`ProtocolError::TimedOut`] when
    /// no job became available.
    async fn reserve(&mut self, tubes: &[String], timeout: Duration)
        -> ProtocolResult<(u64, Bytes)>;

    /// Names of all existing tubes.
    async fn list_tubes(&mut self) -> ProtocolResult<Vec<String>>;

    /// Raw `stats-job` dictionary.
    async fn stats_job(&mut self, id: u64) -> ProtocolResult<HashMap<String, String>>;

    /// Raw `stats-tube` dictionary.
    async fn stats_tube(&mut self, tube: &str) -> ProtocolResult<HashMap<String, String>>;

    /// Delete a job in any state.
    async fn delete(&mut self, id: u64) -> ProtocolResult<()>;

    /// Politely end the session.
    async fn quit(&mut self) -> ProtocolResult<()>;
}

/// Validate a tube name the way the server does.
pub fn validate_tube_name(name: &str) -> ProtocolResult<()> {
    let valid_char =
        |c: char| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | ';' | '.' | '$' | '_' | '(' | ')' | '-');

    if name.is_empty()
        || name.len() > MAX_TUBE_NAME_LEN
        || name.starts_with('-')
        || !name.chars().all(valid_char)
    {
        return Err(ProtocolError::InvalidTubeName(name.to_string()));
    }

    Ok(())
}
