//! Per-destination rolling state and status machine.
//!
//! Each state keeps a bounded history of probe outcomes, consecutive
//! success/failure counters, and the current status. Mutation is
//! serialized by an internal lock; the struct is shared by the registry
//! and the status serializer through `Arc`.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::config::{Destination, Group};
use crate::probe::ProbeOutcome;

/// Hard cap on history length regardless of configuration.
pub const MAX_HISTORY: usize = 1000;

/// Monitor status, ordered from fresh to failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStatus {
    Pending,
    Ok,
    Warning,
    Failure,
}

impl std::fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MonitorStatus::Pending => "PENDING",
            MonitorStatus::Ok => "OK",
            MonitorStatus::Warning => "WARNING",
            MonitorStatus::Failure => "FAILURE",
        };
        write!(f, "{s}")
    }
}

struct StateInner {
    history: VecDeque<ProbeOutcome>,
    last: Option<ProbeOutcome>,
    consecutive_ok: u32,
    consecutive_fail: u32,
    status: MonitorStatus,
}

/// Rolling state for one destination.
pub struct MonitorState {
    destination: Destination,
    group_name: String,
    id: String,
    description: String,
    history_cap: usize,
    inner: Mutex<StateInner>,
}

impl MonitorState {
    pub fn new(destination: Destination, group: &Group) -> Self {
        let id = format!(
            "{}_{}_{}_{}",
            group.sort, group.name, destination.sort, destination.name
        );
        let description = destination.test.description();
        let history_cap = destination.history.min(MAX_HISTORY);

        Self {
            destination,
            group_name: group.name.clone(),
            id,
            description,
            history_cap,
            inner: Mutex::new(StateInner {
                history: VecDeque::new(),
                last: None,
                consecutive_ok: 0,
                consecutive_fail: 0,
                status: MonitorStatus::Pending,
            }),
        }
    }

    /// Apply one probe outcome: record it and advance the status machine.
    pub fn add_outcome(&self, outcome: ProbeOutcome) {
        let mut inner = self.inner.lock().unwrap();

        inner.last = Some(outcome.clone());
        inner.history.push_back(outcome.clone());
        while inner.history.len() > self.history_cap {
            inner.history.pop_front();
        }

        if outcome.success {
            inner.consecutive_ok += 1;
            inner.consecutive_fail = 0;

            // A fresh monitor goes healthy on its first success; recovery
            // from Warning/Failure needs `reset` consecutive successes.
            if inner.status == MonitorStatus::Pending
                || (inner.status != MonitorStatus::Ok
                    && inner.consecutive_ok >= self.destination.reset)
            {
                inner.status = MonitorStatus::Ok;
                inner.consecutive_ok = 0;
            }
        } else {
            inner.consecutive_fail += 1;
            inner.consecutive_ok = 0;

            if inner.consecutive_fail >= self.destination.failure {
                inner.status = MonitorStatus::Failure;
            } else if inner.consecutive_fail >= self.destination.warning {
                inner.status = MonitorStatus::Warning;
            }
        }
    }

    /// Zero both counters and force the status back to OK. Used by the
    /// forced re-arming hook for long-failing monitors.
    pub fn reset_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_ok = 0;
        inner.consecutive_fail = 0;
        inner.status = MonitorStatus::Ok;
        tracing::debug!("reset counters for monitor {}", self.destination.name);
    }

    pub fn status(&self) -> MonitorStatus {
        self.inner.lock().unwrap().status
    }

    pub fn last(&self) -> Option<ProbeOutcome> {
        self.inner.lock().unwrap().last.clone()
    }

    /// Percentage of successful outcomes in the history; 0 when empty.
    pub fn uptime_percent(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        if inner.history.is_empty() {
            return 0.0;
        }
        let ok = inner.history.iter().filter(|o| o.success).count();
        ok as f64 / inner.history.len() as f64 * 100.0
    }

    pub fn history_snapshot(&self) -> Vec<ProbeOutcome> {
        self.inner.lock().unwrap().history.iter().cloned().collect()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().unwrap().consecutive_fail
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.inner.lock().unwrap().consecutive_ok
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    /// Stable identifier `<group_sort>_<group_name>_<dest_sort>_<dest_name>`;
    /// also the suppression key.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn test_description(&self) -> &str {
        &self.description
    }
}
