//! In-process queue server.
//!
//! Mirrors the beanstalkd semantics the crate relies on (per-tube ready
//! queues ordered by priority then id, delayed promotion, bury/kick,
//! reserved jobs returning to ready when their connection goes away) without
//! a network hop. Tests use it to simulate server outages:
//!
//! - [`MemoryServer::set_available`] makes new connects fail
//! - [`MemoryServer::kill_connections`] severs every live connection
//! - [`MemoryServer::fail_next`] / [`MemoryServer::stall_next`] make the
//!   next call of one command error out or hang
//!
//! TTR expiry is not modelled.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::error::{ProtocolError, ProtocolResult};
use super::{validate_tube_name, Connection, Job, JobState, DEFAULT_TUBE, URGENT_PRIORITY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Ready,
    Delayed,
    Reserved(u64),
    Buried,
}

impl Slot {
    fn name(&self) -> &'static str {
        match self {
            Slot::Ready => "ready",
            Slot::Delayed => "delayed",
            Slot::Reserved(_) => "reserved",
            Slot::Buried => "buried",
        }
    }
}

/// Commands that can be made to misbehave once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryCommand {
    Reserve,
    StatsJob,
    Delete,
}

#[derive(Debug, Clone, Copy)]
enum Mischief {
    Fail,
    Stall,
}

#[derive(Debug)]
struct JobRecord {
    id: u64,
    tube: String,
    body: Bytes,
    priority: u32,
    delay: Duration,
    ttr: Duration,
    slot: Slot,
    created_at: Instant,
    ready_at: Instant,
    reserves: u64,
    buries: u64,
    kicks: u64,
}

#[derive(Debug, Default)]
struct TubeRecord {
    total_jobs: u64,
    waiting: usize,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    jobs: HashMap<u64, JobRecord>,
    tubes: HashMap<String, TubeRecord>,
    tube_order: Vec<String>,
    mischief: HashMap<MemoryCommand, Mischief>,
}

impl State {
    fn ensure_tube(&mut self, name: &str) -> &mut TubeRecord {
        if !self.tubes.contains_key(name) {
            self.tube_order.push(name.to_string());
        }
        self.tubes.entry(name.to_string()).or_default()
    }

    fn insert(&mut self, tube: &str, body: Bytes, priority: u32, delay: Duration, ttr: Duration) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        let now = Instant::now();
        let slot = if delay.is_zero() { Slot::Ready } else { Slot::Delayed };

        self.ensure_tube(tube).total_jobs += 1;
        self.jobs.insert(
            id,
            JobRecord {
                id,
                tube: tube.to_string(),
                body,
                priority,
                delay,
                ttr: ttr.max(Duration::from_secs(1)),
                slot,
                created_at: now,
                ready_at: now + delay,
                reserves: 0,
                buries: 0,
                kicks: 0,
            },
        );
        id
    }

    fn promote_delayed(&mut self, now: Instant) {
        for job in self.jobs.values_mut() {
            if job.slot == Slot::Delayed && job.ready_at <= now {
                job.slot = Slot::Ready;
            }
        }
    }

    fn release_reserved_by(&mut self, conn: Option<u64>) {
        for job in self.jobs.values_mut() {
            if let Slot::Reserved(owner) = job.slot {
                if conn.map_or(true, |c| c == owner) {
                    job.slot = Slot::Ready;
                }
            }
        }
    }

    /// Oldest job of `tube` in `slot`, in the order the server would hand it out.
    fn oldest(&self, tube: &str, slot: Slot) -> Option<&JobRecord> {
        let candidates = self
            .jobs
            .values()
            .filter(|j| j.tube == tube && j.slot == slot);
        match slot {
            Slot::Ready => candidates.min_by_key(|j| (j.priority, j.id)),
            Slot::Delayed => candidates.min_by_key(|j| (j.ready_at, j.id)),
            _ => candidates.min_by_key(|j| j.id),
        }
    }

    fn next_ready(&self, watched: &[String]) -> Option<u64> {
        self.jobs
            .values()
            .filter(|j| j.slot == Slot::Ready && watched.contains(&j.tube))
            .min_by_key(|j| (j.priority, j.id))
            .map(|j| j.id)
    }

    fn next_promotion(&self, watched: &[String]) -> Option<Instant> {
        self.jobs
            .values()
            .filter(|j| j.slot == Slot::Delayed && watched.contains(&j.tube))
            .map(|j| j.ready_at)
            .min()
    }
}

struct Shared {
    state: Mutex<State>,
    notify: Notify,
    available: AtomicBool,
    generation: AtomicU64,
    next_conn_id: AtomicU64,
    opened: AtomicUsize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle to an in-process queue server. Cheap to clone.
#[derive(Clone)]
pub struct MemoryServer {
    shared: Arc<Shared>,
}

impl MemoryServer {
    pub fn new() -> Self {
        let mut state = State::default();
        state.ensure_tube(DEFAULT_TUBE);

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                notify: Notify::new(),
                available: AtomicBool::new(true),
                generation: AtomicU64::new(0),
                next_conn_id: AtomicU64::new(0),
                opened: AtomicUsize::new(0),
            }),
        }
    }

    /// Open a connection, failing with "connection refused" while unavailable.
    pub async fn connect(&self) -> ProtocolResult<MemoryConnection> {
        if !self.shared.available.load(Ordering::SeqCst) {
            return Err(ProtocolError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "memory server unavailable",
            )));
        }

        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection {
            shared: Arc::clone(&self.shared),
            id: self.shared.next_conn_id.fetch_add(1, Ordering::SeqCst) + 1,
            generation: self.shared.generation.load(Ordering::SeqCst),
            closed: false,
            used: DEFAULT_TUBE.to_string(),
            watched: vec![DEFAULT_TUBE.to_string()],
        })
    }

    /// Toggle whether new connections are accepted.
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::SeqCst);
    }

    /// Sever every live connection, returning their reserved jobs to ready.
    pub fn kill_connections(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.lock().release_reserved_by(None);
        self.shared.notify.notify_waiters();
    }

    /// Number of connections opened since the server was created.
    pub fn connections_opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Insert a ready job directly, bypassing connections and availability.
    pub fn enqueue(&self, tube: &str, body: impl Into<Bytes>) -> u64 {
        let id = self
            .shared
            .lock()
            .insert(tube, body.into(), 0, Duration::ZERO, Duration::ZERO);
        self.shared.notify.notify_waiters();
        id
    }

    /// Make the next `command` on any connection fail with a reset error.
    pub fn fail_next(&self, command: MemoryCommand) {
        self.shared.lock().mischief.insert(command, Mischief::Fail);
    }

    /// Make the next `command` on any connection never answer.
    pub fn stall_next(&self, command: MemoryCommand) {
        self.shared.lock().mischief.insert(command, Mischief::Stall);
    }

    /// Whether a job with this id still exists in any state.
    pub fn contains(&self, id: u64) -> bool {
        self.shared.lock().jobs.contains_key(&id)
    }
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

/// A connection to a [`MemoryServer`].
pub struct MemoryConnection {
    shared: Arc<Shared>,
    id: u64,
    generation: u64,
    closed: bool,
    used: String,
    watched: Vec<String>,
}

/// Keeps `current-waiting` accurate even if a reserve is cancelled.
struct WaitingGuard<'a> {
    shared: &'a Shared,
    tubes: &'a [String],
}

impl<'a> WaitingGuard<'a> {
    fn new(shared: &'a Shared, tubes: &'a [String]) -> Self {
        let mut state = shared.lock();
        for tube in tubes {
            state.ensure_tube(tube).waiting += 1;
        }
        Self { shared, tubes }
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        for tube in self.tubes {
            let record = state.ensure_tube(tube);
            record.waiting = record.waiting.saturating_sub(1);
        }
    }
}

impl MemoryConnection {
    fn check_alive(&self) -> ProtocolResult<()> {
        if self.closed || self.generation != self.shared.generation.load(Ordering::SeqCst) {
            return Err(ProtocolError::ConnectionClosed);
        }
        Ok(())
    }

    /// Lock the server state after checking this connection is still alive.
    fn state(&self) -> ProtocolResult<MutexGuard<'_, State>> {
        self.check_alive()?;
        let mut state = self.shared.lock();
        state.promote_delayed(Instant::now());
        Ok(state)
    }

    /// Play out a queued failure or hang for `command`, if any.
    async fn mischief(&self, command: MemoryCommand) -> ProtocolResult<()> {
        let planned = self.state()?.mischief.remove(&command);
        match planned {
            Some(Mischief::Fail) => Err(ProtocolError::Io(io::Error::new(
                io::ErrorKind::ConnectionReset,
                format!("injected {:?} failure", command),
            ))),
            Some(Mischief::Stall) => std::future::pending().await,
            None => Ok(()),
        }
    }

    fn switch_tube(&mut self, tube: &str) -> ProtocolResult<()> {
        validate_tube_name(tube)?;
        self.state()?.ensure_tube(tube);
        self.used = tube.to_string();
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        if !self.closed {
            self.shared.lock().release_reserved_by(Some(self.id));
            self.shared.notify.notify_waiters();
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn put(
        &mut self,
        tube: &str,
        body: &[u8],
        priority: u32,
        delay: Duration,
        ttr: Duration,
    ) -> ProtocolResult<u64> {
        self.switch_tube(tube)?;
        let id = self.state()?.insert(
            &self.used,
            Bytes::copy_from_slice(body),
            priority,
            delay,
            ttr,
        );
        self.shared.notify.notify_waiters();
        Ok(id)
    }

    async fn bury(&mut self, id: u64, priority: u32) -> ProtocolResult<()> {
        let mut state = self.state()?;
        match state.jobs.get_mut(&id) {
            Some(job) if job.slot == Slot::Reserved(self.id) => {
                job.slot = Slot::Buried;
                job.priority = priority;
                job.buries += 1;
                Ok(())
            }
            _ => Err(ProtocolError::NotFound),
        }
    }

    async fn kick(&mut self, tube: &str, bound: u32) -> ProtocolResult<u64> {
        self.switch_tube(tube)?;
        let mut state = self.state()?;

        let has_buried = state.oldest(tube, Slot::Buried).is_some();
        let from = if has_buried { Slot::Buried } else { Slot::Delayed };

        let mut ids: Vec<u64> = state
            .jobs
            .values()
            .filter(|j| j.tube == tube && j.slot == from)
            .map(|j| j.id)
            .collect();
        ids.sort_unstable();
        ids.truncate(bound as usize);

        for id in &ids {
            if let Some(job) = state.jobs.get_mut(id) {
                job.slot = Slot::Ready;
                job.kicks += 1;
            }
        }
        drop(state);

        if !ids.is_empty() {
            self.shared.notify.notify_waiters();
        }
        Ok(ids.len() as u64)
    }

    async fn touch(&mut self, id: u64) -> ProtocolResult<()> {
        let state = self.state()?;
        match state.jobs.get(&id) {
            Some(job) if job.slot == Slot::Reserved(self.id) => Ok(()),
            _ => Err(ProtocolError::NotFound),
        }
    }

    async fn peek(&mut self, id: u64) -> ProtocolResult<Bytes> {
        let state = self.state()?;
        state
            .jobs
            .get(&id)
            .map(|j| j.body.clone())
            .ok_or(ProtocolError::NotFound)
    }

    async fn peek_state(&mut self, tube: &str, state: JobState) -> ProtocolResult<Job> {
        self.switch_tube(tube)?;
        let slot = match state {
            JobState::Ready => Slot::Ready,
            JobState::Delayed => Slot::Delayed,
            JobState::Buried => Slot::Buried,
        };

        let guard = self.state()?;
        guard
            .oldest(tube, slot)
            .map(|j| Job {
                id: j.id,
                tube: j.tube.clone(),
                body: j.body.clone(),
            })
            .ok_or(ProtocolError::NotFound)
    }

    async fn reserve(
        &mut self,
        tubes: &[String],
        timeout: Duration,
    ) -> ProtocolResult<(u64, Bytes)> {
        if !tubes.is_empty() {
            for tube in tubes {
                validate_tube_name(tube)?;
                self.state()?.ensure_tube(tube);
            }
            self.watched = tubes.to_vec();
        }

        self.mischief(MemoryCommand::Reserve).await?;

        let deadline = Instant::now() + timeout;
        let shared = Arc::clone(&self.shared);
        let _waiting = WaitingGuard::new(&shared, &self.watched);

        loop {
            // Register interest before inspecting state so no wakeup is lost
            let notified = shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_promotion = {
                let mut state = self.state()?;
                if let Some(id) = state.next_ready(&self.watched) {
                    let job = state.jobs.get_mut(&id).ok_or(ProtocolError::InternalError)?;
                    job.slot = Slot::Reserved(self.id);
                    job.reserves += 1;
                    return Ok((job.id, job.body.clone()));
                }
                state.next_promotion(&self.watched)
            };

            if Instant::now() >= deadline {
                return Err(ProtocolError::TimedOut);
            }
            let wake_at = next_promotion.map_or(deadline, |t| t.min(deadline));

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn list_tubes(&mut self) -> ProtocolResult<Vec<String>> {
        Ok(self.state()?.tube_order.clone())
    }

    async fn stats_job(&mut self, id: u64) -> ProtocolResult<HashMap<String, String>> {
        self.mischief(MemoryCommand::StatsJob).await?;
        let state = self.state()?;
        let job = state.jobs.get(&id).ok_or(ProtocolError::NotFound)?;
        let now = Instant::now();

        let mut stats = HashMap::new();
        stats.insert("id".to_string(), job.id.to_string());
        stats.insert("tube".to_string(), job.tube.clone());
        stats.insert("state".to_string(), job.slot.name().to_string());
        stats.insert("pri".to_string(), job.priority.to_string());
        stats.insert(
            "age".to_string(),
            now.duration_since(job.created_at).as_secs().to_string(),
        );
        stats.insert("delay".to_string(), job.delay.as_secs().to_string());
        stats.insert("ttr".to_string(), job.ttr.as_secs().to_string());
        stats.insert("reserves".to_string(), job.reserves.to_string());
        stats.insert("timeouts".to_string(), "0".to_string());
        stats.insert("releases".to_string(), "0".to_string());
        stats.insert("buries".to_string(), job.buries.to_string());
        stats.insert("kicks".to_string(), job.kicks.to_string());
        Ok(stats)
    }

    async fn stats_tube(&mut self, tube: &str) -> ProtocolResult<HashMap<String, String>> {
        validate_tube_name(tube)?;
        let state = self.state()?;
        let record = state.tubes.get(tube).ok_or(ProtocolError::NotFound)?;

        let count = |slot: Slot| {
            state
                .jobs
                .values()
                .filter(|j| j.tube == tube && j.slot == slot)
                .count()
        };
        let reserved = state
            .jobs
            .values()
            .filter(|j| j.tube == tube && matches!(j.slot, Slot::Reserved(_)))
            .count();
        let urgent = state
            .jobs
            .values()
            .filter(|j| j.tube == tube && j.slot == Slot::Ready && j.priority < URGENT_PRIORITY)
            .count();

        let mut stats = HashMap::new();
        stats.insert("name".to_string(), tube.to_string());
        stats.insert("current-jobs-urgent".to_string(), urgent.to_string());
        stats.insert("current-jobs-ready".to_string(), count(Slot::Ready).to_string());
        stats.insert("current-jobs-reserved".to_string(), reserved.to_string());
        stats.insert("current-jobs-delayed".to_string(), count(Slot::Delayed).to_string());
        stats.insert("current-jobs-buried".to_string(), count(Slot::Buried).to_string());
        stats.insert("total-jobs".to_string(), record.total_jobs.to_string());
        stats.insert("current-waiting".to_string(), record.waiting.to_string());
        Ok(stats)
    }

    async fn delete(&mut self, id: u64) -> ProtocolResult<()> {
        self.mischief(MemoryCommand::Delete).await?;
        let mut state = self.state()?;
        match state.jobs.get(&id).map(|j| j.slot) {
            Some(Slot::Reserved(owner)) if owner != self.id => Err(ProtocolError::NotFound),
            Some(_) => {
                state.jobs.remove(&id);
                Ok(())
            }
            None => Err(ProtocolError::NotFound),
        }
    }

    async fn quit(&mut self) -> ProtocolResult<()> {
        if !self.closed {
            self.closed = true;
            self.shared.lock().release_reserved_by(Some(self.id));
            self.shared.notify.notify_waiters();
        }
        Ok(())
    }
}
