//! Shared Application State
//!
//! Everything here is read-only after startup. The credential provider is the
//! only component with interior state shared across sessions.

use crate::config::Config;
use scheduler_core::{CalendarWriter, CredentialProvider};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub calendar: Arc<dyn CalendarWriter>,
    /// Agent instructions with `{today}` and `{now_utc}` placeholders.
    pub system_prompt: Arc<String>,
}
