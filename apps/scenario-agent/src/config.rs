use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    /// Port the local control API and UI listen on.
    pub port: u16,
    /// Compose binary used to launch and tear down scenarios.
    pub compose_bin: String,
    /// Display-proxy binary bridging the scenario's remote-display port.
    pub proxy_bin: String,
    /// Local port the display proxy listens on unless the start request overrides it.
    pub proxy_listen_port: u16,
    /// Port the orchestrator accepts registrations on.
    pub orchestrator_registration_port: u16,
    /// Port the orchestrator ingests log lines on.
    pub orchestrator_log_port: u16,
    /// Directory scenario definitions are materialized into.
    pub work_dir: PathBuf,
    /// Scenario name applied when the start request omits one.
    pub default_scenario_name: String,
    pub launch_timeout_secs: u64,
    pub teardown_timeout_secs: u64,
    pub terminate_grace_secs: u64,
    pub relay_warmup_secs: u64,
    pub log_push_timeout_secs: u64,
    pub registration_timeout_secs: u64,
    pub proxy_probe_delay_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env::var("AGENT_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            compose_bin: env::var("COMPOSE_BIN").unwrap_or(defaults.compose_bin),
            proxy_bin: env::var("DISPLAY_PROXY_BIN").unwrap_or(defaults.proxy_bin),
            proxy_listen_port: env::var("DISPLAY_PROXY_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.proxy_listen_port),
            orchestrator_registration_port: env::var("ORCHESTRATOR_REGISTRATION_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.orchestrator_registration_port),
            orchestrator_log_port: env::var("ORCHESTRATOR_LOG_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.orchestrator_log_port),
            work_dir: env::var("SCENARIO_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            default_scenario_name: env::var("DEFAULT_SCENARIO_NAME")
                .unwrap_or(defaults.default_scenario_name),
            launch_timeout_secs: env::var("LAUNCH_TIMEOUT")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(defaults.launch_timeout_secs),
            teardown_timeout_secs: env::var("TEARDOWN_TIMEOUT")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(defaults.teardown_timeout_secs),
            terminate_grace_secs: env::var("TERMINATE_GRACE")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(defaults.terminate_grace_secs),
            relay_warmup_secs: env::var("RELAY_WARMUP")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(defaults.relay_warmup_secs),
            log_push_timeout_secs: env::var("LOG_PUSH_TIMEOUT")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(defaults.log_push_timeout_secs),
            registration_timeout_secs: env::var("REGISTRATION_TIMEOUT")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(defaults.registration_timeout_secs),
            proxy_probe_delay_secs: env::var("PROXY_PROBE_DELAY")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(defaults.proxy_probe_delay_secs),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            compose_bin: "docker-compose".to_string(),
            proxy_bin: "websockify".to_string(),
            proxy_listen_port: 8081,
            orchestrator_registration_port: 8080,
            orchestrator_log_port: 8080,
            work_dir: env::temp_dir(),
            default_scenario_name: "vm-scenario".to_string(),
            launch_timeout_secs: 120,
            teardown_timeout_secs: 60,
            terminate_grace_secs: 5,
            relay_warmup_secs: 3,
            log_push_timeout_secs: 2,
            registration_timeout_secs: 5,
            proxy_probe_delay_secs: 1,
        }
    }
}
