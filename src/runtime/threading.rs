use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::RuntimeConfig;
use crate::event::EventEnvelope;
use crate::ledger::{Ledger, LedgerError};

/// Roles run by the worker pool, one thread each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkerRole {
    /// Feeds decoded events into the ledger in arrival order.
    Ingest,
    /// Runs compaction, aging and gap sweeps off the ingest path.
    Summariser,
}

impl WorkerRole {
    fn as_str(self) -> &'static str {
        match self {
            WorkerRole::Ingest => "ingest",
            WorkerRole::Summariser => "summariser",
        }
    }

    pub fn all() -> [WorkerRole; 2] {
        [WorkerRole::Ingest, WorkerRole::Summariser]
    }
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command processed by the ingest worker.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestCommand(pub EventEnvelope);

/// Command processed by the summariser worker.
#[derive(Debug, Clone, PartialEq)]
pub enum SummariserCommand {
    MarkReady {
        marker_id: u64,
        start: u64,
        end: u64,
        description: String,
    },
    Compact { marker_id: u64 },
    Reprocess { marker_id: u64 },
    RebuildSecondary {
        marker_id: u64,
        events: Vec<EventEnvelope>,
    },
    Age { range_id: u64 },
    Confirm { range_id: u64 },
    SweepTransient,
}

trait RoleExecutor<T>: Send + 'static {
    fn handle(&mut self, command: T) -> Result<(), LedgerError>;

    /// Called when the queue stayed empty for one poll interval.
    fn idle(&mut self) {}
}

struct IngestWorker {
    ledger: Arc<Ledger>,
}

impl RoleExecutor<IngestCommand> for IngestWorker {
    fn handle(&mut self, command: IngestCommand) -> Result<(), LedgerError> {
        self.ledger.ingest(command.0).map(|_| ())
    }
}

struct SummariserWorker {
    ledger: Arc<Ledger>,
}

impl RoleExecutor<SummariserCommand> for SummariserWorker {
    fn handle(&mut self, command: SummariserCommand) -> Result<(), LedgerError> {
        match command {
            SummariserCommand::MarkReady {
                marker_id,
                start,
                end,
                description,
            } => self
                .ledger
                .mark_ready(marker_id, start, end, &description)
                .map(|_| ()),
            SummariserCommand::Compact { marker_id } => self.ledger.compact(marker_id).map(|_| ()),
            SummariserCommand::Reprocess { marker_id } => {
                self.ledger.reprocess(marker_id).map(|_| ())
            }
            SummariserCommand::RebuildSecondary { marker_id, events } => self
                .ledger
                .rebuild_secondary(marker_id, events)
                .map(|_| ()),
            SummariserCommand::Age { range_id } => self.ledger.age_range(range_id).map(|_| ()),
            SummariserCommand::Confirm { range_id } => {
                self.ledger.confirm_range(range_id).map(|_| ())
            }
            SummariserCommand::SweepTransient => {
                self.ledger.sweep_transient();
                Ok(())
            }
        }
    }

    fn idle(&mut self) {
        if self.ledger.is_live() {
            self.ledger.sweep_transient();
        }
    }
}

/// Signals stored in the queue shared by worker threads.
enum RoleSignal<T> {
    Work(T),
    Shutdown,
}

/// Shared queue backing each role.
struct RoleQueueShared<T> {
    capacity: usize,
    state: Mutex<QueueState<T>>,
    cv: Condvar,
}

struct QueueState<T> {
    buffer: VecDeque<RoleSignal<T>>,
    closed: bool,
}

impl<T> RoleQueueShared<T> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(QueueState {
                buffer: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            cv: Condvar::new(),
        }
    }

    fn close(&self) {
        let mut guard = self.state.lock();
        guard.closed = true;
        guard.buffer.clear();
        self.cv.notify_all();
    }

    fn recv_timeout(&self, timeout: Duration) -> Option<RoleSignal<T>> {
        let mut guard = self.state.lock();
        loop {
            if let Some(signal) = guard.buffer.pop_front() {
                return Some(signal);
            }
            if guard.closed {
                return Some(RoleSignal::Shutdown);
            }
            if self.cv.wait_for(&mut guard, timeout).timed_out() {
                return None;
            }
        }
    }
}

/// Bounded, non-blocking sender into a role queue.
pub struct RoleSender<T> {
    role: WorkerRole,
    shared: Arc<RoleQueueShared<T>>,
}

impl<T> Clone for RoleSender<T> {
    fn clone(&self) -> Self {
        Self {
            role: self.role,
            shared: self.shared.clone(),
        }
    }
}

impl<T> RoleSender<T> {
    /// Enqueues `command`, handing it back when the queue is full or closed.
    pub fn send(&self, command: T) -> Result<(), RoleSendError<T>> {
        let mut guard = self.shared.state.lock();
        if guard.closed {
            return Err(RoleSendError::Closed(command));
        }
        if guard.buffer.len() >= self.shared.capacity {
            return Err(RoleSendError::Full(command));
        }
        guard.buffer.push_back(RoleSignal::Work(command));
        self.shared.cv.notify_one();
        Ok(())
    }

    pub fn role(&self) -> WorkerRole {
        self.role
    }

    /// Commands waiting in the queue.
    pub fn depth(&self) -> usize {
        self.shared.state.lock().buffer.len()
    }

    fn signal_shutdown(&self) {
        let mut guard = self.shared.state.lock();
        if guard.closed {
            return;
        }
        guard.buffer.push_back(RoleSignal::Shutdown);
        self.shared.cv.notify_one();
    }
}

/// Error returned when enqueuing a command fails.
#[derive(Debug)]
pub enum RoleSendError<T> {
    Full(T),
    Closed(T),
}

impl<T> RoleSendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            RoleSendError::Full(command) | RoleSendError::Closed(command) => command,
        }
    }
}

impl<T> fmt::Display for RoleSendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleSendError::Full(_) => f.write_str("role queue full"),
            RoleSendError::Closed(_) => f.write_str("role queue closed"),
        }
    }
}

/// Counters exported for each role.
#[derive(Debug, Clone, Default)]
pub struct RoleMetrics {
    processed: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl RoleMetrics {
    fn record(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Commands handled, failures included.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Metrics for both roles.
#[derive(Debug, Clone, Default)]
pub struct WorkerPoolMetrics {
    ingest: RoleMetrics,
    summariser: RoleMetrics,
}

impl WorkerPoolMetrics {
    pub fn ingest(&self) -> &RoleMetrics {
        &self.ingest
    }

    pub fn summariser(&self) -> &RoleMetrics {
        &self.summariser
    }

    pub fn role(&self, role: WorkerRole) -> &RoleMetrics {
        match role {
            WorkerRole::Ingest => self.ingest(),
            WorkerRole::Summariser => self.summariser(),
        }
    }
}

struct RoleSupervisor<T> {
    sender: RoleSender<T>,
    join: Mutex<Option<thread::JoinHandle<()>>>,
}

impl<T> RoleSupervisor<T>
where
    T: Send + 'static,
{
    fn spawn<E>(
        role: WorkerRole,
        config: &RuntimeConfig,
        mut executor: E,
        ledger: Arc<Ledger>,
        metrics: RoleMetrics,
    ) -> io::Result<Self>
    where
        E: RoleExecutor<T>,
    {
        let shared = Arc::new(RoleQueueShared::new(config.queue_capacity));
        let queue = shared.clone();
        let idle_timeout = Duration::from_millis(config.idle_poll_ms);
        let join = thread::Builder::new()
            .name(format!("poolledger_{}", role.as_str()))
            .spawn(move || {
                debug!(role = %role, "worker started");
                loop {
                    if ledger.is_shutting_down() {
                        warn!(role = %role, "ledger shutting down, worker exiting");
                        break;
                    }
                    match queue.recv_timeout(idle_timeout) {
                        Some(RoleSignal::Work(command)) => {
                            if let Err(err) = executor.handle(command) {
                                error!(role = %role, error = %err, "worker command failed");
                                metrics.record_failure();
                            }
                            metrics.record();
                        }
                        Some(RoleSignal::Shutdown) => break,
                        None => executor.idle(),
                    }
                }
                queue.close();
                debug!(role = %role, "worker stopped");
            })?;
        Ok(Self {
            sender: RoleSender { role, shared },
            join: Mutex::new(Some(join)),
        })
    }

    /// Lets queued work finish, then stops the thread.
    fn shutdown(&self) {
        self.sender.signal_shutdown();
        if let Some(handle) = self.join.lock().take() {
            if handle.join().is_err() {
                error!(role = %self.sender.role, "worker thread panicked");
            }
        }
        self.sender.shared.close();
    }
}

/// Fixed pool of OS threads driving one [`Ledger`].
pub struct LedgerWorkerPool {
    ingest: RoleSupervisor<IngestCommand>,
    summariser: RoleSupervisor<SummariserCommand>,
    metrics: WorkerPoolMetrics,
    shutdown: AtomicBool,
}

impl LedgerWorkerPool {
    pub fn start(ledger: Arc<Ledger>, config: &RuntimeConfig) -> io::Result<Self> {
        let metrics = WorkerPoolMetrics::default();
        let ingest = RoleSupervisor::spawn(
            WorkerRole::Ingest,
            config,
            IngestWorker {
                ledger: ledger.clone(),
            },
            ledger.clone(),
            metrics.ingest.clone(),
        )?;
        let summariser = RoleSupervisor::spawn(
            WorkerRole::Summariser,
            config,
            SummariserWorker {
                ledger: ledger.clone(),
            },
            ledger,
            metrics.summariser.clone(),
        )?;
        info!(queue_capacity = config.queue_capacity, "worker pool started");
        Ok(Self {
            ingest,
            summariser,
            metrics,
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn ingest(&self) -> RoleSender<IngestCommand> {
        self.ingest.sender.clone()
    }

    pub fn summariser(&self) -> RoleSender<SummariserCommand> {
        self.summariser.sender.clone()
    }

    pub fn metrics(&self) -> &WorkerPoolMetrics {
        &self.metrics
    }

    /// Drains both queues and joins the threads. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::Relaxed) {
            return;
        }
        self.ingest.shutdown();
        self.summariser.shutdown();
        info!(
            ingested = self.metrics.ingest.processed(),
            summarised = self.metrics.summariser.processed(),
            "worker pool stopped"
        );
    }
}

impl Drop for LedgerWorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
