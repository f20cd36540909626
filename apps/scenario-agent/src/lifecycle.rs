//! The scenario lifecycle state machine.
//!
//! At most one scenario is active at a time. `Idle → Starting → Running →
//! Stopping → Idle`, with a rollback edge `Starting → Idle`; stop is not
//! cancellable once committed. The manager exclusively owns the scenario
//! state and every supervised process handle; background tasks (log relay,
//! display proxy) only ever receive read-only copies of the scenario name.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::config::Config;
use crate::events::{AgentEvent, LocalEventBroadcaster};
use crate::process::{self, ProcessError};
use crate::proxy::DisplayProxySupervisor;
use crate::registrar::ConnectionRegistrar;
use crate::relay::{LogRelay, RelaySettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioState {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// Everything a start request supplies about a scenario.
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioDescriptor {
    pub definition_content: String,
    pub display_port: Option<u16>,
    pub proxy_port: Option<u16>,
    pub name: String,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("a scenario is already active")]
    ScenarioAlreadyActive,
    #[error("no scenario is currently active")]
    NoScenarioActive,
    #[error("another lifecycle operation is in progress")]
    OperationInProgress,
    #[error("scenario launch failed: {diagnostics}")]
    Launch { diagnostics: String },
    #[error("scenario teardown failed: {diagnostics}")]
    Teardown { diagnostics: String },
    #[error("'{tool}' was not found; ensure it is installed and on PATH")]
    ToolMissing { tool: String },
}

impl LifecycleError {
    fn from_launch(err: ProcessError) -> Self {
        match err {
            ProcessError::ToolMissing { tool } => LifecycleError::ToolMissing { tool },
            other => LifecycleError::Launch {
                diagnostics: other.to_string(),
            },
        }
    }

    fn from_teardown(err: ProcessError) -> Self {
        match err {
            ProcessError::ToolMissing { tool } => LifecycleError::ToolMissing { tool },
            other => LifecycleError::Teardown {
                diagnostics: other.to_string(),
            },
        }
    }
}

/// Point-in-time view of the state machine, readable without touching the
/// lifecycle lock.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub state: ScenarioState,
    pub scenario: Option<String>,
    pub message: String,
}

/// The scenario and its supervised collaborators, created together on a
/// successful start and destroyed together on stop or rollback. Dropping the
/// materialized definition removes it from disk.
struct ActiveScenario {
    name: String,
    definition: NamedTempFile,
    relay: Option<LogRelay>,
    proxy: Option<DisplayProxySupervisor>,
}

pub struct ScenarioLifecycleManager {
    config: Arc<Config>,
    registrar: Arc<ConnectionRegistrar>,
    events: LocalEventBroadcaster,
    http: reqwest::Client,
    /// Single in-flight lifecycle operation; `try_lock` failure maps to
    /// `OperationInProgress`. Holds the active scenario so ownership and
    /// serialization travel together.
    op: Mutex<Option<ActiveScenario>>,
    snapshot: RwLock<StatusSnapshot>,
}

impl ScenarioLifecycleManager {
    pub fn new(
        config: Arc<Config>,
        registrar: Arc<ConnectionRegistrar>,
        events: LocalEventBroadcaster,
        http: reqwest::Client,
    ) -> Self {
        Self {
            config,
            registrar,
            events,
            http,
            op: Mutex::new(None),
            snapshot: RwLock::new(StatusSnapshot {
                state: ScenarioState::Idle,
                scenario: None,
                message: "Idle".to_string(),
            }),
        }
    }

    /// Pure read; runs concurrently with anything, including an in-flight
    /// start or stop.
    pub async fn status(&self) -> StatusSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Start a scenario. Allowed only from `Idle`; the blocking launch runs
    /// to completion or timeout, and any failure rolls the state machine
    /// back to `Idle` with the materialized definition removed.
    pub async fn start(&self, descriptor: ScenarioDescriptor) -> Result<(), LifecycleError> {
        let mut active = self
            .op
            .try_lock()
            .map_err(|_| LifecycleError::OperationInProgress)?;
        if active.is_some() {
            return Err(LifecycleError::ScenarioAlreadyActive);
        }

        self.set_state(ScenarioState::Starting, Some(descriptor.name.clone()))
            .await;

        let definition = match self.materialize(&descriptor.definition_content) {
            Ok(definition) => definition,
            Err(err) => {
                self.set_state(ScenarioState::Idle, None).await;
                return Err(LifecycleError::Launch {
                    diagnostics: format!("could not materialize scenario definition: {err}"),
                });
            }
        };
        let definition_path = definition.path().to_string_lossy().into_owned();

        let launch = process::run_to_completion(
            &self.config.compose_bin,
            &["-f", &definition_path, "up", "-d"],
            Duration::from_secs(self.config.launch_timeout_secs),
        )
        .await;

        if let Err(err) = launch {
            // Rollback: dropping the definition deletes the temp file.
            drop(definition);
            self.set_state(ScenarioState::Idle, None).await;
            warn!(scenario = %descriptor.name, error = %err, "scenario launch failed");
            return Err(LifecycleError::from_launch(err));
        }

        let proxy = self.start_proxy(&descriptor).await;
        let relay = self.start_relay(&descriptor, &definition_path).await;

        *active = Some(ActiveScenario {
            name: descriptor.name.clone(),
            definition,
            relay,
            proxy,
        });
        self.set_state(ScenarioState::Running, Some(descriptor.name.clone()))
            .await;
        info!(scenario = %descriptor.name, "scenario started");
        Ok(())
    }

    /// Stop the active scenario. Best-effort cleanup always wins: even when
    /// teardown fails, every supervised process is terminated, the
    /// materialized definition is removed, and the state advances to `Idle`.
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        let mut active = self
            .op
            .try_lock()
            .map_err(|_| LifecycleError::OperationInProgress)?;
        let ActiveScenario {
            name,
            definition,
            relay,
            proxy,
        } = active.take().ok_or(LifecycleError::NoScenarioActive)?;

        self.set_state(ScenarioState::Stopping, Some(name.clone()))
            .await;

        let definition_path = definition.path().to_string_lossy().into_owned();
        let teardown = process::run_to_completion(
            &self.config.compose_bin,
            &["-f", &definition_path, "down"],
            Duration::from_secs(self.config.teardown_timeout_secs),
        )
        .await;

        if let Some(relay) = relay {
            relay.stop().await;
        }
        if let Some(mut proxy) = proxy {
            proxy.stop().await;
        }
        drop(definition);

        self.set_state(ScenarioState::Idle, None).await;

        match teardown {
            Ok(_) => {
                info!(scenario = %name, "scenario stopped");
                Ok(())
            }
            Err(err) => {
                warn!(scenario = %name, error = %err, "scenario teardown failed; cleanup completed anyway");
                Err(LifecycleError::from_teardown(err))
            }
        }
    }

    fn materialize(&self, content: &str) -> std::io::Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("scenario-")
            .suffix(".yaml")
            .tempfile_in(&self.config.work_dir)?;
        file.write_all(content.as_bytes())?;
        file.flush()?;
        Ok(file)
    }

    /// Display access is auxiliary: launch failures are reported through the
    /// event channel, never as failures of the start operation.
    async fn start_proxy(&self, descriptor: &ScenarioDescriptor) -> Option<DisplayProxySupervisor> {
        let display_port = descriptor.display_port?;
        let listen_port = descriptor
            .proxy_port
            .unwrap_or(self.config.proxy_listen_port);
        let mut proxy = DisplayProxySupervisor::new(
            self.config.proxy_bin.clone(),
            listen_port,
            Duration::from_secs(self.config.proxy_probe_delay_secs),
            Duration::from_secs(self.config.terminate_grace_secs),
        );
        if let Err(err) = proxy.start(display_port).await {
            warn!(error = %err, "display proxy failed to start; continuing without remote display");
            self.events.publish(AgentEvent::Diagnostic {
                message: format!("display proxy unavailable: {err}"),
            });
        }
        Some(proxy)
    }

    /// Log relaying is best-effort and never required for start to succeed.
    async fn start_relay(
        &self,
        descriptor: &ScenarioDescriptor,
        definition_path: &str,
    ) -> Option<LogRelay> {
        let tail = match process::spawn_supervised(
            &self.config.compose_bin,
            &["-f", definition_path, "logs", "-f", "--no-log-prefix"],
        ) {
            Ok(tail) => tail,
            Err(err) => {
                warn!(error = %err, "could not start log tail; scenario logs will not be relayed");
                self.events.publish(AgentEvent::Diagnostic {
                    message: format!("log relay unavailable: {err}"),
                });
                return None;
            }
        };

        let settings = RelaySettings {
            scenario: descriptor.name.clone(),
            sink: self.registrar.log_sink().await,
            warmup: Duration::from_secs(self.config.relay_warmup_secs),
            push_timeout: Duration::from_secs(self.config.log_push_timeout_secs),
            terminate_grace: Duration::from_secs(self.config.terminate_grace_secs),
        };
        Some(LogRelay::start(
            tail,
            settings,
            self.http.clone(),
            self.events.clone(),
        ))
    }

    async fn set_state(&self, state: ScenarioState, scenario: Option<String>) {
        let message = match (state, &scenario) {
            (ScenarioState::Starting, Some(name)) => format!("Starting scenario: {name}"),
            (ScenarioState::Running, Some(name)) => format!("Running scenario: {name}"),
            (ScenarioState::Stopping, Some(name)) => format!("Stopping scenario: {name}"),
            _ => "Idle".to_string(),
        };
        {
            let mut snapshot = self.snapshot.write().await;
            *snapshot = StatusSnapshot {
                state,
                scenario: scenario.clone(),
                message: message.clone(),
            };
        }
        self.events.publish(AgentEvent::Status { state, message });
    }
}
