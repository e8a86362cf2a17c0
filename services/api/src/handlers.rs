//! Axum Handlers for the REST API
//!
//! Liveness and calendar-connection status. Both are documented with
//! `utoipa` for the generated OpenAPI document.

use axum::{extract::State, response::Json};
use std::sync::Arc;

use crate::{
    models::{GoogleStatusResponse, HealthResponse},
    state::AppState,
};

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is running", body = HealthResponse)
    )
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}

/// Reports whether calendar credentials are available.
#[utoipa::path(
    get,
    path = "/api/google/status",
    responses(
        (status = 200, description = "Calendar connection status", body = GoogleStatusResponse)
    )
)]
pub async fn google_status(State(state): State<Arc<AppState>>) -> Json<GoogleStatusResponse> {
    Json(GoogleStatusResponse {
        connected: state.credentials.is_connected().await,
    })
}
