//! One-shot registration handshake with the orchestrator.
//!
//! The registrar owns the orchestrator endpoint; every other component reads
//! it through accessors. Registration is a single outbound call with a short
//! timeout — a failure leaves any previously registered endpoint untouched.

use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::relay::RelaySink;

#[derive(Debug, Clone, Serialize)]
pub struct AgentIdentity {
    pub display_name: String,
    pub local_address: String,
}

#[derive(Debug, Clone)]
pub struct OrchestratorEndpoint {
    pub host: String,
    pub registration_port: u16,
    pub log_port: u16,
}

#[derive(Debug, Error)]
#[error("registration with orchestrator at {url} failed: {source}")]
pub struct RegistrationError {
    pub url: String,
    #[source]
    pub source: reqwest::Error,
}

/// Connection details exposed by `GET /api/status`.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub connected: bool,
    pub display_name: Option<String>,
    pub orchestrator_address: Option<String>,
}

#[derive(Debug)]
struct Registration {
    identity: AgentIdentity,
    endpoint: OrchestratorEndpoint,
}

pub struct ConnectionRegistrar {
    http: reqwest::Client,
    timeout: Duration,
    registration: RwLock<Option<Registration>>,
}

impl ConnectionRegistrar {
    pub fn new(http: reqwest::Client, timeout: Duration) -> Self {
        Self {
            http,
            timeout,
            registration: RwLock::new(None),
        }
    }

    /// Register this agent with the orchestrator. On success the endpoint is
    /// stored and supplied to later relays; on failure the prior endpoint
    /// (if any) is left untouched.
    pub async fn register(
        &self,
        display_name: String,
        endpoint: OrchestratorEndpoint,
    ) -> Result<AgentIdentity, RegistrationError> {
        let identity = AgentIdentity {
            display_name,
            local_address: local_ip(),
        };
        let url = format!(
            "http://{}:{}/api/agents/register",
            endpoint.host, endpoint.registration_port
        );
        let payload = json!({
            "display_name": identity.display_name,
            "ip_address": identity.local_address,
        });

        info!(url = %url, display_name = %identity.display_name, "registering with orchestrator");
        let result = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .and_then(|response| response.error_for_status());

        match result {
            Ok(_) => {
                info!(url = %url, "registered with orchestrator");
                let mut registration = self.registration.write().await;
                *registration = Some(Registration {
                    identity: identity.clone(),
                    endpoint,
                });
                Ok(identity)
            }
            Err(source) => {
                warn!(url = %url, error = %source, "registration failed");
                Err(RegistrationError { url, source })
            }
        }
    }

    pub async fn connected(&self) -> bool {
        self.registration.read().await.is_some()
    }

    pub async fn connection_info(&self) -> ConnectionInfo {
        match self.registration.read().await.as_ref() {
            Some(registration) => ConnectionInfo {
                connected: true,
                display_name: Some(registration.identity.display_name.clone()),
                orchestrator_address: Some(registration.endpoint.host.clone()),
            },
            None => ConnectionInfo {
                connected: false,
                display_name: None,
                orchestrator_address: None,
            },
        }
    }

    /// The currently registered log sink, if any. `None` means relays run
    /// local-only and must say so rather than dropping lines silently.
    pub async fn log_sink(&self) -> Option<RelaySink> {
        self.registration
            .read()
            .await
            .as_ref()
            .map(|registration| RelaySink {
                url: format!(
                    "http://{}:{}/api/log",
                    registration.endpoint.host, registration.endpoint.log_port
                ),
                agent_name: registration.identity.display_name.clone(),
            })
    }
}

/// Best-effort local address detection for the registration payload: a UDP
/// socket is "connected" to an unroutable address purely to learn which local
/// interface would carry it. No packet is sent.
pub fn local_ip() -> String {
    let fallback = "127.0.0.1".to_string();
    match std::net::UdpSocket::bind("0.0.0.0:0") {
        Ok(socket) => socket
            .connect("10.255.255.255:1")
            .and_then(|_| socket.local_addr())
            .map(|addr| addr.ip().to_string())
            .unwrap_or(fallback),
        Err(_) => fallback,
    }
}
