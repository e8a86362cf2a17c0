//! Main Entrypoint for the Scheduler API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Loading the agent instructions.
//! 3. Initializing the calendar credential provider and client.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use scheduler_api::{config::Config, router::create_router, state::AppState};
use scheduler_core::{CalendarWriter, CredentialProvider, GoogleCalendar, GoogleTokenProvider};
use std::{net::SocketAddr, path::Path, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// Reads the agent instructions from the prompts directory.
fn load_system_prompt(prompts_path: &Path) -> anyhow::Result<String> {
    let path = prompts_path.join("system_prompt.md");
    std::fs::read_to_string(&path)
        .with_context(|| format!("system_prompt.md not found in {}", prompts_path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 2. Agent Instructions ---
    let system_prompt = Arc::new(load_system_prompt(&config.prompts_path)?);

    // --- 3. Calendar ---
    let credentials: Arc<dyn CredentialProvider> =
        Arc::new(GoogleTokenProvider::new(&config.google_token_file));
    if !credentials.is_connected().await {
        warn!(
            token_file = %config.google_token_file.display(),
            "Google Calendar is not connected; bookings will fail until the consent flow is completed"
        );
    }
    let calendar: Arc<dyn CalendarWriter> = Arc::new(
        GoogleCalendar::new(config.google_calendar_id.clone(), config.calendar_timeout)
            .context("Failed to build calendar client")?,
    );

    let app_state = Arc::new(AppState {
        config: Arc::new(config.clone()),
        credentials,
        calendar,
        system_prompt,
    });

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        agent_url = %config.agent.url,
        calendar = %config.google_calendar_id,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
