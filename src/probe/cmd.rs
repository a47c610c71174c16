//! Arbitrary shell command probe.
//!
//! The command runs in a subshell, wrapped in the system `timeout` utility
//! when available. Success means the exit code equals the configured
//! expectation; a signal-killed child reports `128 + signum`.

use std::os::unix::process::ExitStatusExt;
use std::process::Command;
use std::sync::OnceLock;

use crate::error::ProbeError;

/// Combined stdout/stderr capture limit.
const MAX_OUTPUT_BYTES: usize = 4096;

fn timeout_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| {
        Command::new("sh")
            .args(["-c", "command -v timeout"])
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    })
}

/// Single-quote a string for the shell.
fn shell_quote(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('\'');
    for c in s.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

pub fn run(command: &str, expected_exit_code: i32, timeout_ms: u64) -> Result<(), ProbeError> {
    let timeout_secs = timeout_ms.div_ceil(1000);

    let full_cmd = if timeout_available() {
        format!("timeout {timeout_secs}s sh -c {} 2>&1", shell_quote(command))
    } else {
        format!("{command} 2>&1")
    };

    tracing::trace!("executing command: {full_cmd}");

    let output = Command::new("sh")
        .args(["-c", &full_cmd])
        .output()
        .map_err(|e| ProbeError::ConnectionFailed(format!("failed to execute command: {e}")))?;

    let mut captured = output.stdout;
    captured.truncate(MAX_OUTPUT_BYTES);

    let exit_code = match output.status.code() {
        Some(code) => code,
        None => 128 + output.status.signal().unwrap_or(0),
    };

    if exit_code == expected_exit_code {
        return Ok(());
    }

    let text = String::from_utf8_lossy(&captured);
    let first_line = text.lines().next().unwrap_or("");
    if !first_line.is_empty() && first_line.len() < 100 {
        tracing::debug!(
            "cmd test failed: exit code {exit_code} != expected {expected_exit_code}: {first_line}"
        );
    }

    Err(ProbeError::CommandFailed(exit_code))
}
