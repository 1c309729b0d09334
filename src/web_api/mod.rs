//! WebAPI - REST API Endpoints
//!
//! ## Responsibilities
//!
//! - Stream listing and desired-status control (start/stop)
//! - Live MJPEG view fed from the frame cache
//! - Health endpoint

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub running_workers: usize,
    pub cached_streams: usize,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        running_workers: state.orchestrator.worker_count().await,
        cached_streams: state.cache.len().await,
    };

    Json(response)
}
