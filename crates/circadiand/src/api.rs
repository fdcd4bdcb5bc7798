//! Diagnostic and control HTTP API.
//!
//! Read-only observability for the scheduling engine (queue depth,
//! in-flight commands, loop state, current targets) plus the
//! enable/disable switch for the circadian controller.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::routing::post;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::controller::CircadianController;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
}

/// Response for the enable/disable endpoints
#[derive(Serialize)]
struct SwitchResponse {
    enabled: bool,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    version: &'static str,
    controller: Arc<CircadianController>,
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
        }),
    )
}

/// Handler for GET /v1/status
#[tracing::instrument(skip(state))]
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/status request");
    (StatusCode::OK, Json(state.controller.status()))
}

/// Handler for POST /v1/enable
#[tracing::instrument(skip(state))]
async fn enable(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.controller.enable();
    (StatusCode::OK, Json(SwitchResponse { enabled: true }))
}

/// Handler for POST /v1/disable
#[tracing::instrument(skip(state))]
async fn disable(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.controller.disable();
    (StatusCode::OK, Json(SwitchResponse { enabled: false }))
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/status", get(status))
        .route("/v1/enable", post(enable))
        .route("/v1/disable", post(disable))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// Binds the configured address and serves until the provided shutdown
/// signal is triggered.
pub async fn serve(
    config: ApiConfig,
    controller: Arc<CircadianController>,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        version: env!("CARGO_PKG_VERSION"),
        controller,
    });
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.listen, config.port).parse()?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}
