//! External-process plumbing for the agent.
//!
//! Scenario launch/teardown are one-shot commands run to completion with a
//! bounded wait; the log tail and the display proxy are supervised background
//! processes handed back as a [`ProcessHandle`]. Commands are always invoked
//! directly with an argv vector, never through a shell.

use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::{ChildStderr, ChildStdout, Command};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("'{tool}' was not found; ensure it is installed and on PATH")]
    ToolMissing { tool: String },
    #[error("command exited with status {code}: {output}")]
    CommandFailed { code: i32, output: String },
    #[error("command did not finish within {timeout_secs}s and was killed")]
    TimedOut { timeout_secs: u64 },
    #[error("process i/o error: {0}")]
    Io(std::io::Error),
}

fn render_command(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

fn spawn_error(program: &str, err: std::io::Error) -> ProcessError {
    if err.kind() == std::io::ErrorKind::NotFound {
        ProcessError::ToolMissing {
            tool: program.to_string(),
        }
    } else {
        ProcessError::Io(err)
    }
}

/// Run a one-shot command to completion, capturing combined stdout+stderr.
///
/// Returns the combined output on a zero exit. A non-zero exit surfaces as
/// `CommandFailed` with the output as diagnostics. If the command does not
/// finish within `timeout` it is killed and reaped (`kill_on_drop`), and the
/// call fails with `TimedOut`.
pub async fn run_to_completion(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<String, ProcessError> {
    let command_line = render_command(program, args);
    info!(command = %command_line, "running external command");

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|err| spawn_error(program, err))?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(ProcessError::Io)?,
        Err(_) => {
            // Dropping the timed-out wait kills and reaps the child.
            warn!(command = %command_line, timeout_secs = timeout.as_secs(), "command timed out");
            return Err(ProcessError::TimedOut {
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    let combined = combined.trim().to_string();

    if output.status.success() {
        info!(command = %command_line, "command finished successfully");
        Ok(combined)
    } else {
        let code = output.status.code().unwrap_or(-1);
        warn!(command = %command_line, code, "command failed");
        Err(ProcessError::CommandFailed {
            code,
            output: combined,
        })
    }
}

/// Spawn a supervised background process with piped stdout/stderr.
pub fn spawn_supervised(program: &str, args: &[&str]) -> Result<ProcessHandle, ProcessError> {
    let command_line = render_command(program, args);
    info!(command = %command_line, "spawning supervised process");

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|err| spawn_error(program, err))?;
    info!(command = %command_line, pid = ?child.id(), "supervised process started");

    Ok(ProcessHandle {
        child,
        command_line,
    })
}

/// Handle to a live supervised process. Destroyed only once the process is
/// confirmed terminated; `terminate` always reaps, so no zombie survives the
/// handle.
pub struct ProcessHandle {
    child: tokio::process::Child,
    command_line: String,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Wait up to `timeout` for the process to exit on its own. Returns the
    /// exit status if it did, `None` if it is still running.
    pub async fn wait(&mut self, timeout: Duration) -> Option<std::process::ExitStatus> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(err)) => {
                warn!(command = %self.command_line, error = %err, "failed to wait on process");
                None
            }
            Err(_) => None,
        }
    }

    /// Graceful termination: signal, wait up to `grace`, then escalate to a
    /// forced kill. The child is reaped on every path.
    pub async fn terminate(&mut self, grace: Duration) {
        if let Ok(Some(status)) = self.child.try_wait() {
            debug!(command = %self.command_line, status = ?status.code(), "process already exited");
            return;
        }

        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            if let Err(err) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!(command = %self.command_line, pid, error = %err, "failed to signal process");
            }
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(command = %self.command_line, status = ?status.code(), "process terminated");
            }
            _ => {
                warn!(command = %self.command_line, "process ignored termination; escalating to kill");
                let _ = self.child.start_kill();
                let _ = self.child.wait().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn one_shot_command_captures_output() {
        let output = run_to_completion("echo", &["hello"], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output, "hello");
    }

    #[tokio::test]
    async fn non_zero_exit_surfaces_as_command_failed() {
        let err = run_to_completion("false", &[], Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            ProcessError::CommandFailed { code, .. } => assert_ne!(code, 0),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_binary_is_tool_missing() {
        let err = run_to_completion("definitely-not-a-real-binary", &[], Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            ProcessError::ToolMissing { tool } => {
                assert_eq!(tool, "definitely-not-a-real-binary")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let err = run_to_completion("sleep", &["5"], Duration::from_millis(200))
            .await
            .unwrap_err();
        match err {
            ProcessError::TimedOut { .. } => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn terminate_reclaims_a_running_process() {
        let mut handle = spawn_supervised("sleep", &["30"]).unwrap();
        assert!(handle.is_alive());
        handle.terminate(Duration::from_secs(2)).await;
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn terminate_is_safe_on_an_exited_process() {
        let mut handle = spawn_supervised("true", &[]).unwrap();
        // Let it exit on its own first.
        handle.wait(Duration::from_secs(5)).await;
        handle.terminate(Duration::from_secs(1)).await;
        assert!(!handle.is_alive());
    }
}
