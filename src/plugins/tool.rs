//! Helpers for plugins that shell out to external tools.

use crate::error::ExecutionError;
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Captured result of a finished tool process.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Fails unless the exit code is one of `accepted`.
    pub fn expect_codes(self, tool: &str, accepted: &[i32]) -> Result<Self, ExecutionError> {
        match self.code {
            Some(code) if accepted.contains(&code) => Ok(self),
            code => Err(ExecutionError::ToolFailed {
                tool: tool.to_string(),
                code: code.unwrap_or(-1),
                stderr: self.stderr.trim().to_string(),
            }),
        }
    }
}

/// Runs `command` to completion, killing it after `timeout`.
///
/// The child is polled rather than waited on so a tool stalled on network
/// access cannot hang the run. Output pipes are drained on background
/// threads so a chatty tool never blocks on a full pipe.
pub fn run_tool(
    tool: &str,
    command: &mut Command,
    timeout: Duration,
) -> Result<ToolOutput, ExecutionError> {
    let start = Instant::now();
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ExecutionError::Spawn {
            tool: tool.to_string(),
            source,
        })?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let status = loop {
        match child.try_wait()? {
            Some(status) => break status,
            None => {
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    tracing::warn!(tool, secs = timeout.as_secs(), "killed tool after timeout");
                    return Err(ExecutionError::Timeout {
                        operation: tool.to_string(),
                        seconds: timeout.as_secs(),
                    });
                }
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    };

    Ok(ToolOutput {
        code: status.code(),
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

/// Parses tool stdout as JSON, treating blank output as `default`.
pub fn parse_json(
    tool: &str,
    text: &str,
    default: serde_json::Value,
) -> Result<serde_json::Value, ExecutionError> {
    if text.trim().is_empty() {
        return Ok(default);
    }
    serde_json::from_str(text).map_err(|source| ExecutionError::Parse {
        tool: tool.to_string(),
        source,
    })
}

/// Returns `true` if an executable named `cmd` exists on `PATH`.
///
/// On Unix the file must also have an executable permission bit set.
pub fn which_exists(cmd: &str) -> bool {
    std::env::var_os("PATH")
        .map(|path| {
            std::env::split_paths(&path).any(|dir| {
                let candidate = dir.join(cmd);
                if !candidate.is_file() {
                    return false;
                }
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::metadata(&candidate)
                        .map(|m| m.permissions().mode() & 0o111 != 0)
                        .unwrap_or(false)
                }
                #[cfg(not(unix))]
                {
                    true
                }
            })
        })
        .unwrap_or(false)
}
