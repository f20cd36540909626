//! Supervision of the optional display-proxy process.
//!
//! The proxy bridges a scenario's remote-display port to a local
//! browser-accessible port. It is a best-effort auxiliary: a launch failure
//! is reported to the caller but never rolls back a running scenario.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::process::{self, ProcessError, ProcessHandle};

pub struct DisplayProxySupervisor {
    bin: String,
    listen_port: u16,
    probe_delay: Duration,
    terminate_grace: Duration,
    handle: Option<ProcessHandle>,
}

impl DisplayProxySupervisor {
    pub fn new(
        bin: String,
        listen_port: u16,
        probe_delay: Duration,
        terminate_grace: Duration,
    ) -> Self {
        Self {
            bin,
            listen_port,
            probe_delay,
            terminate_grace,
            handle: None,
        }
    }

    /// Launch the proxy bound to the local listen port and the scenario's
    /// display port. Re-checks the process shortly after launch so an
    /// immediate exit (port in use, bad arguments) is reported rather than
    /// silently leaving no proxy behind.
    pub async fn start(&mut self, display_port: u16) -> Result<(), ProcessError> {
        let listen = self.listen_port.to_string();
        let upstream = format!("localhost:{display_port}");
        let mut handle = process::spawn_supervised(&self.bin, &[&listen, &upstream])?;

        if let Some(status) = handle.wait(self.probe_delay).await {
            let code = status.code().unwrap_or(-1);
            warn!(code, "display proxy exited prematurely");
            return Err(ProcessError::CommandFailed {
                code,
                output: "display proxy exited prematurely".to_string(),
            });
        }

        info!(
            pid = ?handle.pid(),
            listen_port = self.listen_port,
            display_port,
            "display proxy is running"
        );
        self.handle = Some(handle);
        Ok(())
    }

    /// Idempotent graceful termination; safe to call even if never started.
    pub async fn stop(&mut self) {
        match self.handle.take() {
            Some(mut handle) => handle.terminate(self.terminate_grace).await,
            None => debug!("display proxy was not running"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor(bin: &str) -> DisplayProxySupervisor {
        DisplayProxySupervisor::new(
            bin.to_string(),
            8081,
            Duration::from_millis(200),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let mut proxy = supervisor("definitely-not-a-real-binary");
        proxy.stop().await;
        proxy.stop().await;
    }

    #[tokio::test]
    async fn missing_binary_is_reported() {
        let mut proxy = supervisor("definitely-not-a-real-binary");
        let err = proxy.start(5901).await.unwrap_err();
        match err {
            ProcessError::ToolMissing { tool } => {
                assert_eq!(tool, "definitely-not-a-real-binary")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn premature_exit_is_reported() {
        // `true` accepts the arguments and exits immediately.
        let mut proxy = supervisor("true");
        let err = proxy.start(5901).await.unwrap_err();
        match err {
            ProcessError::CommandFailed { .. } => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn start_then_stop_terminates_the_proxy() {
        // A tiny script stands in for a long-running proxy binary.
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-proxy.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let mut proxy = supervisor(script.to_str().unwrap());
        proxy.start(5901).await.unwrap();
        proxy.stop().await;
        proxy.stop().await;
    }
}
