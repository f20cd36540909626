use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use scenario_agent::{
    cli::Cli, config::Config, handlers::build_router, lifecycle::LifecycleError, state::AppState,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    cli.apply(&mut config);

    info!(
        port = config.port,
        compose_bin = %config.compose_bin,
        proxy_bin = %config.proxy_bin,
        "starting scenario agent"
    );

    let state = AppState::new(config.clone());

    let app = build_router(state.clone())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind to address");

    info!("scenario agent listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await
        .expect("failed to start server");
}

/// Wait for ctrl-c, then best-effort stop any active scenario so no
/// containers outlive the agent.
async fn shutdown_signal(state: AppState) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested; stopping any active scenario");
    match state.lifecycle.stop().await {
        Ok(()) => info!("active scenario stopped"),
        Err(LifecycleError::NoScenarioActive) => {}
        Err(err) => warn!(error = %err, "could not cleanly stop scenario on shutdown"),
    }
}
