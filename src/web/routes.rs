//! HTTP route handlers for the web server.
//!
//! All business logic is delegated to the pool manager and `AppState`.

use std::sync::Arc;
use axum::{
    extract::{Extension, Json},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use tracing::info;

use crate::AppConfig;
use crate::AppState;

/// JSON error response helper
fn err_response(status: StatusCode, msg: &str) -> impl IntoResponse {
    (status, Json(serde_json::json!({ "error": msg })))
}

/// Build the API router with all endpoints.
pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Config
        .route("/config", get(get_config).post(configure))
        // Pool control
        .route("/pool/start", post(start_pool))
        .route("/pool/stop", post(stop_pool))
        .route("/pool/status", get(get_pool_status))
        // Status event feed
        .route("/events", get(get_events))
        // Logs
        .route("/logs/dir", get(get_log_dir))
        // Auth middleware (only if VIEWERPOOL_WEB_PASS is set)
        .layer(middleware::from_fn(super::auth::basic_auth_middleware))
        .layer(Extension(state))
}

// ========== Config Handlers ==========

async fn get_config(
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    let config = state.config.read().await.clone();
    Json(config)
}

async fn configure(
    Extension(state): Extension<Arc<AppState>>,
    Json(config): Json<AppConfig>,
) -> impl IntoResponse {
    info!("Configuring application via web API");
    state.configure(config).await;
    StatusCode::OK
}

// ========== Pool Control Handlers ==========

async fn start_pool(
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    info!("Starting pool via web API");
    match state.start_pool().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => err_response(StatusCode::BAD_REQUEST, &e.to_string()).into_response(),
    }
}

async fn stop_pool(
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    info!("Stopping pool via web API");
    state.pool.stop().await;
    StatusCode::OK
}

async fn get_pool_status(
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    Json(state.pool.snapshot())
}

// ========== Event Feed Handler ==========

async fn get_events(
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    Json(state.recent_events())
}

// ========== Logs Handler ==========

async fn get_log_dir() -> impl IntoResponse {
    match crate::log_dir() {
        Some(p) => Json(serde_json::json!({ "path": p.to_string_lossy() })).into_response(),
        None => err_response(StatusCode::INTERNAL_SERVER_ERROR, "Could not determine log directory").into_response(),
    }
}
