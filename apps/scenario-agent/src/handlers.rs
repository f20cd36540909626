use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::lifecycle::{LifecycleError, ScenarioDescriptor, ScenarioState};
use crate::registrar::OrchestratorEndpoint;
use crate::state::AppState;
use crate::websocket::log_stream_handler;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/connect", post(connect_orchestrator))
        .route("/api/scenario/start", post(start_scenario))
        .route("/api/scenario/stop", post(stop_scenario))
        .route("/api/status", get(get_status))
        .route("/ws/log-stream", get(log_stream_handler))
        .with_state(state)
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Conflict(&'static str),
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ApiErrorBody<'a> {
    error: &'a str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (
                axum::http::StatusCode::BAD_REQUEST,
                Json(ApiErrorBody {
                    error: "bad_request",
                    message: msg,
                }),
            )
                .into_response(),
            ApiError::Conflict(msg) => (
                axum::http::StatusCode::CONFLICT,
                Json(ApiErrorBody {
                    error: "conflict",
                    message: msg.to_string(),
                }),
            )
                .into_response(),
            ApiError::Internal(msg) => (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiErrorBody {
                    error: "internal",
                    message: msg,
                }),
            )
                .into_response(),
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::ScenarioAlreadyActive => {
                ApiError::Conflict("a scenario is already active")
            }
            LifecycleError::OperationInProgress => {
                ApiError::Conflict("another lifecycle operation is in progress")
            }
            LifecycleError::NoScenarioActive => {
                ApiError::BadRequest("no scenario is currently active".to_string())
            }
            LifecycleError::Launch { .. }
            | LifecycleError::Teardown { .. }
            | LifecycleError::ToolMissing { .. } => ApiError::Internal(err.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub status: &'static str,
    pub message: String,
}

impl AckResponse {
    fn success(message: impl Into<String>) -> Self {
        Self {
            status: "success",
            message: message.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub display_name: String,
    pub orchestrator_address: String,
}

pub async fn connect_orchestrator(
    State(state): State<AppState>,
    Json(request): Json<ConnectRequest>,
) -> ApiResult<AckResponse> {
    let display_name = request.display_name.trim().to_string();
    if display_name.is_empty() {
        return Err(ApiError::BadRequest("display_name must not be empty".to_string()));
    }

    // The address is a host, optionally with a registration-port override.
    let address = request.orchestrator_address.trim();
    let (host, registration_port) = match address.split_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => {
                return Err(ApiError::BadRequest(format!(
                    "invalid orchestrator port in '{address}'"
                )))
            }
        },
        None => (
            address.to_string(),
            state.config.orchestrator_registration_port,
        ),
    };
    if host.is_empty() {
        return Err(ApiError::BadRequest(
            "orchestrator_address must not be empty".to_string(),
        ));
    }

    let endpoint = OrchestratorEndpoint {
        host: host.clone(),
        registration_port,
        log_port: state.config.orchestrator_log_port,
    };
    match state.registrar.register(display_name, endpoint).await {
        Ok(_) => Ok(Json(AckResponse::success(format!("Connected to {host}")))),
        Err(err) => Err(ApiError::Internal(err.to_string())),
    }
}

#[derive(Debug, Deserialize)]
pub struct ScenarioStartRequest {
    pub compose_content: String,
    pub display_port: Option<u16>,
    pub proxy_port: Option<u16>,
    pub scenario_name: Option<String>,
}

pub async fn start_scenario(
    State(state): State<AppState>,
    Json(request): Json<ScenarioStartRequest>,
) -> ApiResult<AckResponse> {
    if request.compose_content.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "compose_content must not be empty".to_string(),
        ));
    }

    let name = request
        .scenario_name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| state.config.default_scenario_name.clone());
    let descriptor = ScenarioDescriptor {
        definition_content: request.compose_content,
        display_port: request.display_port,
        proxy_port: request.proxy_port,
        name,
    };

    state.lifecycle.start(descriptor).await?;
    Ok(Json(AckResponse::success("Scenario started.")))
}

pub async fn stop_scenario(State(state): State<AppState>) -> ApiResult<AckResponse> {
    state.lifecycle.stop().await?;
    Ok(Json(AckResponse::success("Scenario stopped.")))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub state: ScenarioState,
    pub status_message: String,
    pub connected: bool,
    pub display_name: Option<String>,
    pub orchestrator_address: Option<String>,
    pub current_scenario: Option<String>,
}

pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snapshot = state.lifecycle.status().await;
    let connection = state.registrar.connection_info().await;

    // While a scenario is active its message wins; otherwise the status
    // reflects the orchestrator connection.
    let status_message = match snapshot.state {
        ScenarioState::Idle => match &connection.orchestrator_address {
            Some(host) => format!("Connected to {host}"),
            None => "Disconnected".to_string(),
        },
        _ => snapshot.message,
    };

    Json(StatusResponse {
        state: snapshot.state,
        status_message,
        connected: connection.connected,
        display_name: connection.display_name,
        orchestrator_address: connection.orchestrator_address,
        current_scenario: snapshot.scenario,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::{
        body::{self, Body},
        http::{Request, StatusCode},
    };
    use tower::util::ServiceExt;

    #[tokio::test]
    async fn status_defaults_to_disconnected_idle() {
        let state = AppState::new(Config::default());
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/api/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let status: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(status["state"], "idle");
        assert_eq!(status["status_message"], "Disconnected");
        assert_eq!(status["connected"], false);
        assert!(status["current_scenario"].is_null());
    }

    #[tokio::test]
    async fn connect_rejects_empty_display_name() {
        let state = AppState::new(Config::default());
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/connect")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({
                            "display_name": "  ",
                            "orchestrator_address": "10.0.0.5"
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
