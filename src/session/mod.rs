//! Long-lived per-task workers.
//!
//! Each configured task owns one OS thread parked on a wake signal. A caller
//! hands the worker a set of fields with [`SessionManager::trigger`], the
//! worker runs one exchange and parks the result until the caller collects
//! it. At most one exchange per task is pending or running at a time.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TaskConfig;
use crate::exchange::{run_exchange, CompletionStatus, ExchangeOutcome};
use crate::field::ExchangeFields;
use crate::supervisor::{create_supervisor, ProcessSupervisor};
use crate::telemetry::{
    MetricsSnapshot, MetricsStore, EXCHANGES_TOTAL, EXCHANGE_DURATION_MS, EXCHANGE_FAILURES_TOTAL,
    TIMEOUTS_TOTAL,
};

/// Longest a parked worker goes without re-checking the shutdown token.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Task {0} already has an exchange pending or running")]
    Busy(String),

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Duplicate task: {0}")]
    DuplicateTask(String),

    #[error("Session manager is shut down")]
    ShutDown,

    #[error("Failed to start worker thread for {task}: {source}")]
    ThreadSpawn {
        task: String,
        source: std::io::Error,
    },
}

/// Called on the worker thread after every exchange.
pub trait CompletionHook: Send + Sync {
    fn on_complete(&self, task: &str, status: CompletionStatus, exit_code: i32);
}

impl<F> CompletionHook for F
where
    F: Fn(&str, CompletionStatus, i32) + Send + Sync,
{
    fn on_complete(&self, task: &str, status: CompletionStatus, exit_code: i32) {
        self(task, status, exit_code)
    }
}

/// Fields and outcome of a finished exchange.
#[derive(Debug)]
pub struct ExchangeResult {
    pub fields: ExchangeFields,
    pub outcome: ExchangeOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Pending,
    Active,
    Complete,
}

#[derive(Debug)]
struct Slot {
    phase: Phase,
    fields: Option<ExchangeFields>,
    outcome: Option<ExchangeOutcome>,
    wake: bool,
    closed: bool,
}

#[derive(Debug)]
struct Shared {
    slot: Mutex<Slot>,
    signal: Condvar,
}

impl Shared {
    fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                phase: Phase::Idle,
                fields: None,
                outcome: None,
                wake: false,
                closed: false,
            }),
            signal: Condvar::new(),
        }
    }
}

struct Worker {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

struct WorkerContext {
    config: TaskConfig,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    supervisor: Arc<dyn ProcessSupervisor>,
    hook: Option<Arc<dyn CompletionHook>>,
    metrics: Arc<MetricsStore>,
}

impl WorkerContext {
    fn run(self) {
        let task = self.config.identity.as_str();
        debug!(task = %task, "worker started");
        while let Some(mut fields) = self.next_job() {
            let outcome = run_exchange(&self.config, self.supervisor.as_ref(), &self.shutdown, &mut fields);
            self.record(&outcome);
            let (status, exit_code) = (outcome.status, outcome.exit_code);
            {
                let mut slot = self.shared.slot.lock();
                slot.fields = Some(fields);
                slot.outcome = Some(outcome);
                slot.phase = Phase::Complete;
            }
            self.shared.signal.notify_all();
            if let Some(hook) = &self.hook {
                hook.on_complete(task, status, exit_code);
            }
        }

        let mut slot = self.shared.slot.lock();
        slot.closed = true;
        if slot.phase == Phase::Pending {
            warn!(task = %task, "shutdown with a pending exchange, dropping it");
            slot.fields = None;
            slot.phase = Phase::Idle;
        }
        drop(slot);
        self.shared.signal.notify_all();
        debug!(task = %task, "worker stopped");
    }

    /// Park until woken; `None` once shutdown is requested.
    fn next_job(&self) -> Option<ExchangeFields> {
        let mut slot = self.shared.slot.lock();
        loop {
            if self.shutdown.is_cancelled() {
                return None;
            }
            if slot.wake {
                slot.wake = false;
                if slot.phase == Phase::Pending {
                    if let Some(fields) = slot.fields.take() {
                        slot.phase = Phase::Active;
                        return Some(fields);
                    }
                }
                continue;
            }
            // Timed so an externally cancelled token is noticed promptly.
            self.shared.signal.wait_for(&mut slot, IDLE_POLL_INTERVAL);
        }
    }

    fn record(&self, outcome: &ExchangeOutcome) {
        self.metrics.increment_counter(EXCHANGES_TOTAL, 1);
        if !outcome.is_success() {
            self.metrics.increment_counter(EXCHANGE_FAILURES_TOTAL, 1);
        }
        if outcome.timed_out() {
            self.metrics.increment_counter(TIMEOUTS_TOTAL, 1);
        }
        self.metrics
            .record_histogram(EXCHANGE_DURATION_MS, outcome.elapsed.as_secs_f64() * 1000.0);
    }
}

/// Owns the workers of all configured tasks.
pub struct SessionManager {
    workers: BTreeMap<String, Worker>,
    shutdown: CancellationToken,
    metrics: Arc<MetricsStore>,
}

impl SessionManager {
    /// Start one worker per task using the platform supervisor.
    pub fn new(
        tasks: Vec<TaskConfig>,
        hook: Option<Arc<dyn CompletionHook>>,
    ) -> Result<Self, SessionError> {
        Self::with_supervisor(tasks, Arc::from(create_supervisor()), hook)
    }

    pub fn with_supervisor(
        tasks: Vec<TaskConfig>,
        supervisor: Arc<dyn ProcessSupervisor>,
        hook: Option<Arc<dyn CompletionHook>>,
    ) -> Result<Self, SessionError> {
        let mut manager = Self {
            workers: BTreeMap::new(),
            shutdown: CancellationToken::new(),
            metrics: Arc::new(MetricsStore::new()),
        };
        for config in tasks {
            let name = config.identity.clone();
            if manager.workers.contains_key(&name) {
                return Err(SessionError::DuplicateTask(name));
            }
            let shared = Arc::new(Shared::new());
            let context = WorkerContext {
                config,
                shared: shared.clone(),
                shutdown: manager.shutdown.clone(),
                supervisor: supervisor.clone(),
                hook: hook.clone(),
                metrics: manager.metrics.clone(),
            };
            let thread = std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || context.run())
                .map_err(|source| SessionError::ThreadSpawn {
                    task: name.clone(),
                    source,
                })?;
            manager.workers.insert(
                name,
                Worker {
                    shared,
                    thread: Some(thread),
                },
            );
        }
        info!(tasks = manager.workers.len(), "session manager started");
        Ok(manager)
    }

    fn worker(&self, task: &str) -> Result<&Worker, SessionError> {
        self.workers
            .get(task)
            .ok_or_else(|| SessionError::UnknownTask(task.to_string()))
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.workers.keys().map(String::as_str)
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Token cancelled on shutdown; cancelling it requests shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Hand `fields` to the task's worker and wake it.
    pub fn trigger(&self, task: &str, fields: ExchangeFields) -> Result<(), SessionError> {
        let worker = self.worker(task)?;
        if !self.is_running() {
            return Err(SessionError::ShutDown);
        }
        {
            let mut slot = worker.shared.slot.lock();
            if slot.closed {
                return Err(SessionError::ShutDown);
            }
            if matches!(slot.phase, Phase::Pending | Phase::Active) {
                return Err(SessionError::Busy(task.to_string()));
            }
            if slot.phase == Phase::Complete {
                debug!(task = %task, "discarding uncollected result");
            }
            slot.fields = Some(fields);
            slot.outcome = None;
            slot.phase = Phase::Pending;
            slot.wake = true;
        }
        worker.shared.signal.notify_all();
        Ok(())
    }

    /// True while an exchange is pending or running.
    pub fn is_busy(&self, task: &str) -> Result<bool, SessionError> {
        let slot = self.worker(task)?.shared.slot.lock();
        Ok(matches!(slot.phase, Phase::Pending | Phase::Active))
    }

    /// Collect a finished result without blocking.
    pub fn poll_result(&self, task: &str) -> Result<Option<ExchangeResult>, SessionError> {
        let mut slot = self.worker(task)?.shared.slot.lock();
        Ok(take_result(&mut slot))
    }

    /// Block until the task's exchange finishes, or `timeout` passes.
    ///
    /// Returns `Ok(None)` on timeout or when nothing was triggered.
    pub fn wait_result(
        &self,
        task: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<ExchangeResult>, SessionError> {
        let shared = &self.worker(task)?.shared;
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut slot = shared.slot.lock();
        loop {
            if let Some(result) = take_result(&mut slot) {
                return Ok(Some(result));
            }
            if slot.phase == Phase::Idle {
                return if slot.closed {
                    Err(SessionError::ShutDown)
                } else {
                    Ok(None)
                };
            }
            match deadline {
                Some(d) => {
                    if shared.signal.wait_until(&mut slot, d).timed_out() {
                        return Ok(take_result(&mut slot));
                    }
                }
                None => shared.signal.wait(&mut slot),
            }
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Cancel in-flight exchanges, wake every worker once and join them.
    pub fn shutdown(&mut self) {
        if !self.shutdown.is_cancelled() {
            info!("session manager shutting down");
        }
        self.shutdown.cancel();
        for worker in self.workers.values() {
            worker.shared.slot.lock().wake = true;
            worker.shared.signal.notify_all();
        }
        for (name, worker) in self.workers.iter_mut() {
            if let Some(handle) = worker.thread.take() {
                if handle.join().is_err() {
                    warn!(task = %name, "worker thread panicked");
                }
            }
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn take_result(slot: &mut Slot) -> Option<ExchangeResult> {
    if slot.phase != Phase::Complete {
        return None;
    }
    let fields = slot.fields.take()?;
    let outcome = slot.outcome.take()?;
    slot.phase = Phase::Idle;
    Some(ExchangeResult { fields, outcome })
}
