//! Probe executors for network monitoring.
//!
//! Supports ICMP ping, TCP/UDP connect, HTTP/HTTPS GET, and arbitrary
//! shell command tests. Every executor runs synchronously on a worker
//! thread and folds its result into a [`ProbeOutcome`]; probe failures are
//! never fatal.

mod cmd;
mod connect;
mod ping;
pub mod resolver;
mod url;

use std::time::Instant;

use chrono::{DateTime, Local};

use crate::config::TestConfig;
use crate::error::ProbeError;

/// Upper bound of the accepted timeout domain, in milliseconds.
pub const MAX_TIMEOUT_MS: u64 = 300_000;

/// The result of one probe attempt.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub success: bool,
    pub duration_ms: i64,
    pub at: DateTime<Local>,
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn success(duration_ms: i64) -> Self {
        Self {
            success: true,
            duration_ms,
            at: Local::now(),
            error: None,
        }
    }

    pub fn failure(duration_ms: i64, error: impl Into<String>) -> Self {
        Self {
            success: false,
            duration_ms,
            at: Local::now(),
            error: Some(error.into()),
        }
    }
}

/// Execute one probe attempt with the given timeout.
///
/// The duration is measured from entry to return on a monotonic clock.
/// Timeouts outside `(0, 300000]` ms short-circuit to a failed outcome.
pub fn execute(test: &TestConfig, timeout_ms: u64) -> ProbeOutcome {
    if timeout_ms == 0 || timeout_ms > MAX_TIMEOUT_MS {
        return ProbeOutcome::failure(0, "invalid timeout");
    }

    let start = Instant::now();

    let result: Result<(), ProbeError> = match test {
        TestConfig::Ping { host } => ping::run(host, timeout_ms),
        TestConfig::Connect {
            host,
            port,
            protocol,
        } => connect::run(host, *port, *protocol, timeout_ms),
        TestConfig::Url { url, proxy } => url::run(url, proxy.as_deref(), timeout_ms),
        TestConfig::Cmd {
            command,
            expected_exit_code,
        } => cmd::run(command, *expected_exit_code, timeout_ms),
    };

    let duration_ms = start.elapsed().as_millis() as i64;

    match result {
        Ok(()) => ProbeOutcome::success(duration_ms),
        Err(e) => ProbeOutcome::failure(duration_ms, e.to_string()),
    }
}
