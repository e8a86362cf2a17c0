//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, the voice WebSocket endpoint, and OpenAPI documentation.

use crate::{
    handlers,
    models::{GoogleStatusResponse, HealthResponse},
    state::AppState,
    ws::ws_handler,
};

use axum::{Router, routing::get};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::health, handlers::google_status),
    components(schemas(HealthResponse, GoogleStatusResponse)),
    tags(
        (name = "Scheduler API", description = "Voice scheduling agent relay")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/google/status", get(handlers::google_status))
        .route("/ws/voice", get(ws_handler))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
