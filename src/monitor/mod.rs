//! Monitor registry: owns the per-destination states, schedules their
//! probes, applies outcomes, and emits status-transition notifications.

pub mod state;

pub use state::{MonitorState, MonitorStatus, MAX_HISTORY};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::config::MonitorConfig;
use crate::probe::{self, ProbeOutcome};
use crate::push::PushManager;
use crate::scheduler::{Scheduler, WorkerPool};

/// Extra slack on top of the probe timeout when awaiting a worker result.
const PROBE_WAIT_BUFFER_MS: u64 = 5000;

const DEFAULT_ICON: &str = "/icons/icon-192x192.png";

struct Inner {
    states: BTreeMap<String, Arc<MonitorState>>,
    pool: Arc<WorkerPool>,
    scheduler: Scheduler,
    push: Arc<PushManager>,
    running: AtomicBool,
    task_ids: Mutex<Vec<u64>>,
    log_status_every_n: u32,
}

/// The registry of all monitors, shared between the engine and the web
/// surface.
#[derive(Clone)]
pub struct MonitorRegistry {
    inner: Arc<Inner>,
}

/// Worker pool sizing: the configured size wins; otherwise scale with the
/// hardware but never beyond what the monitor count can use.
fn pool_size(configured: usize, monitor_count: usize) -> usize {
    if configured > 0 {
        tracing::info!("using configured thread pool size: {configured}");
        return configured;
    }
    let hardware = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    let size = hardware.max(4).clamp(2, 24).min(monitor_count / 4 + 1);
    tracing::info!(
        "using auto-calculated thread pool size: {size} (hardware: {hardware}, monitors: {monitor_count})"
    );
    size
}

impl MonitorRegistry {
    pub fn new(config: &MonitorConfig, push: Arc<PushManager>) -> Self {
        let monitor_count = config.monitor_count();
        let pool = Arc::new(WorkerPool::new(pool_size(
            config.thread_pool_size,
            monitor_count,
        )));
        let scheduler = Scheduler::new(pool.clone());

        let mut states = BTreeMap::new();
        for group in &config.monitors {
            tracing::info!("initializing monitor group: {}", group.name);
            for dest in &group.destinations {
                let key = format!("{}:{}", group.name, dest.name);
                let state = Arc::new(MonitorState::new(dest.clone(), group));
                tracing::debug!(
                    "initialized monitor: {} ({})",
                    dest.name,
                    state.test_description()
                );
                states.insert(key, state);
            }
        }

        tracing::info!(
            "initialized {} monitors across {} groups with {} worker threads",
            states.len(),
            config.monitors.len(),
            pool.thread_count()
        );

        Self {
            inner: Arc::new(Inner {
                states,
                pool,
                scheduler,
                push,
                running: AtomicBool::new(false),
                task_ids: Mutex::new(Vec::new()),
                log_status_every_n: config.log_status_every_n,
            }),
        }
    }

    /// Start the scheduler and register one repeating probe per monitor.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::info!("starting monitoring tasks");
        self.inner.scheduler.start();

        for state in self.inner.states.values() {
            schedule_state(&self.inner, state);
        }

        tracing::info!(
            "all {} monitoring tasks scheduled",
            self.inner.states.len()
        );
    }

    /// Cancel all probes, stop the scheduler, and drain the pool.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }

        tracing::info!("stopping monitoring tasks");
        let ids = std::mem::take(&mut *self.inner.task_ids.lock().unwrap());
        for id in ids {
            self.inner.scheduler.cancel(id);
        }
        self.inner.scheduler.stop();
        self.inner.pool.shutdown();
        tracing::info!("all monitoring tasks stopped");
    }

    /// Re-arm monitors that have been failing far beyond their threshold.
    pub fn restart_failed(&self) {
        if !self.inner.running.load(Ordering::SeqCst) {
            return;
        }

        let mut restarted = 0usize;
        for state in self.inner.states.values() {
            let dest = state.destination();
            if state.status() == MonitorStatus::Failure
                && state.consecutive_failures() > dest.failure * 3
            {
                tracing::warn!("restarting severely failed monitor: {}", dest.name);
                state.reset_all();
                schedule_state(&self.inner, state);
                restarted += 1;
            }
        }

        if restarted > 0 {
            tracing::info!("restarted {restarted} failed monitors");
        }
    }

    pub fn healthy(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
            && !self.inner.pool.is_stopping()
            && self.inner.pool.pending() <= self.inner.states.len() * 2
    }

    /// Monitor states keyed by `"<group_name>:<destination_name>"`.
    pub fn states(&self) -> &BTreeMap<String, Arc<MonitorState>> {
        &self.inner.states
    }

    /// Register an auxiliary repeating task (watchdog pings and the like)
    /// on the engine scheduler.
    pub fn schedule_repeating(
        &self,
        interval: Duration,
        job: impl Fn() + Send + Sync + 'static,
    ) -> u64 {
        let id = self.inner.scheduler.schedule_repeating(interval, job);
        self.inner.task_ids.lock().unwrap().push(id);
        id
    }
}

fn schedule_state(inner: &Arc<Inner>, state: &Arc<MonitorState>) {
    let interval = Duration::from_secs(state.destination().interval);
    let weak: Weak<Inner> = Arc::downgrade(inner);

    tracing::debug!(
        "scheduled monitor {} (interval: {}s)",
        state.destination().name,
        state.destination().interval
    );

    let state = state.clone();
    let id = inner.scheduler.schedule_repeating(interval, move || {
        if let Some(inner) = weak.upgrade() {
            run_probe(&inner, &state);
        }
    });
    inner.task_ids.lock().unwrap().push(id);
}

/// One probe cycle. The probe executes right here, on the worker the
/// scheduler dispatched to; a second pooled task awaits the outcome with a
/// bounded timeout and applies it, so a probe that hangs past its budget
/// still surfaces as a recorded timeout failure instead of stalling the
/// state silently.
fn run_probe(inner: &Arc<Inner>, state: &Arc<MonitorState>) {
    if !inner.running.load(Ordering::SeqCst) {
        tracing::debug!(
            "monitoring stopped, skipping test for {}",
            state.destination().name
        );
        return;
    }

    let dest = state.destination();
    let timeout_ms = dest.timeout;

    let (tx, rx) = mpsc::channel::<ProbeOutcome>();

    let waiter = {
        let weak = Arc::downgrade(inner);
        let state = state.clone();
        inner.pool.submit(move || {
            if let Some(inner) = weak.upgrade() {
                apply_outcome(&inner, &state, &rx, timeout_ms);
            }
        })
    };
    if let Err(e) = waiter {
        tracing::debug!("cannot schedule result handling for {}: {e}", dest.name);
        return;
    }

    let outcome = probe::execute(&dest.test, timeout_ms);
    // The waiter may already have given up on a pathologically slow probe.
    let _ = tx.send(outcome);
}

/// Await one probe outcome and advance the monitor state. A dropped sender
/// means the probe panicked; a timeout means it overran its budget.
fn apply_outcome(
    inner: &Arc<Inner>,
    state: &Arc<MonitorState>,
    rx: &mpsc::Receiver<ProbeOutcome>,
    timeout_ms: u64,
) {
    let dest = state.destination();
    let budget = Duration::from_millis(timeout_ms + PROBE_WAIT_BUFFER_MS);

    let outcome = match rx.recv_timeout(budget) {
        Ok(outcome) => outcome,
        Err(RecvTimeoutError::Disconnected) => {
            tracing::debug!("test execution failed for {}", dest.name);
            ProbeOutcome::failure(budget.as_millis() as i64, "test execution failed")
        }
        Err(RecvTimeoutError::Timeout) => {
            tracing::warn!(
                "test timeout exceeded for {} ({timeout_ms}ms + 5s buffer)",
                dest.name
            );
            ProbeOutcome::failure(budget.as_millis() as i64, "Test timeout exceeded")
        }
    };

    let prev_status = state.status();
    let success = outcome.success;
    state.add_outcome(outcome);
    let new_status = state.status();

    if prev_status != new_status {
        notify_transition(inner, state, prev_status, new_status);
    } else if !success && new_status != MonitorStatus::Ok {
        // Still failing without a transition; keep the log readable.
        let consecutive = state.consecutive_failures();
        let every_n = inner.log_status_every_n;
        let should_log = consecutive == 1 || every_n == 0 || consecutive % every_n == 0;
        if should_log {
            tracing::warn!(
                "monitor {} status: {new_status} (consecutive failures: {consecutive})",
                dest.name
            );
        }
    }
}

fn notify_transition(
    inner: &Arc<Inner>,
    state: &Arc<MonitorState>,
    prev: MonitorStatus,
    new: MonitorStatus,
) {
    let name = &state.destination().name;
    let consecutive = state.consecutive_failures();

    let (emoji, body) = match new {
        MonitorStatus::Ok => {
            tracing::info!("monitor {name} recovered to OK status");
            ("\u{2705}", "Monitor recovered to OK")
        }
        MonitorStatus::Warning => {
            tracing::warn!("monitor {name} status: WARNING (consecutive failures: {consecutive})");
            ("\u{26a0}\u{fe0f}", "Monitor entered WARNING state")
        }
        MonitorStatus::Failure => {
            tracing::warn!("monitor {name} status: FAILURE (consecutive failures: {consecutive})");
            ("\u{274c}", "Monitor entered FAILURE state")
        }
        MonitorStatus::Pending => ("\u{23f3}", "Monitor is PENDING"),
    };

    let test_id = state.id();
    let title = format!("{emoji} {name} - {new}");
    let data = serde_json::json!({
        "test_id": test_id,
        "previous": prev.to_string(),
        "current": new.to_string(),
        "consecutive_failures": consecutive,
    });

    tracing::info!(
        "status change {prev} -> {new} for {name} (test_id: {test_id})"
    );
    inner
        .push
        .notify_for_test(test_id, &title, body, DEFAULT_ICON, data);
}
