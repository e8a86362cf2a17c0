//! In-memory stand-ins for the credential and calendar capabilities.

use crate::config::{AgentConfig, Config};
use crate::state::AppState;
use async_trait::async_trait;
use scheduler_core::calendar::{CalendarError, CalendarWriter, CreatedEvent, NewEvent};
use scheduler_core::credentials::{AccessToken, CredentialError, CredentialProvider};
use secrecy::SecretString;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::Level;

pub struct FakeCredentials(Option<AccessToken>);

impl FakeCredentials {
    pub fn token(token: &str) -> Self {
        Self(Some(AccessToken::new(token)))
    }

    pub fn missing() -> Self {
        Self(None)
    }
}

#[async_trait]
impl CredentialProvider for FakeCredentials {
    async fn access_token(&self) -> Result<AccessToken, CredentialError> {
        self.0.clone().ok_or(CredentialError::NotConnected)
    }

    async fn is_connected(&self) -> bool {
        self.0.is_some()
    }
}

pub struct FakeCalendar {
    result: Result<CreatedEvent, CalendarError>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl FakeCalendar {
    pub fn succeeding(event_id: &str) -> Self {
        Self {
            result: Ok(CreatedEvent {
                id: event_id.to_string(),
                html_link: Some(format!("https://calendar.example/{event_id}")),
            }),
            delay: Duration::ZERO,
            calls: Arc::default(),
        }
    }

    pub fn failing(error: CalendarError) -> Self {
        Self {
            result: Err(error),
            delay: Duration::ZERO,
            calls: Arc::default(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of insert attempts, counted when each call starts.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl CalendarWriter for FakeCalendar {
    async fn insert_event(
        &self,
        _token: &AccessToken,
        _event: &NewEvent,
    ) -> Result<CreatedEvent, CalendarError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.result.clone()
    }
}

pub fn test_config() -> Config {
    Config {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        agent: AgentConfig {
            url: "ws://127.0.0.1:9/agent".to_string(),
            api_key: SecretString::from("test-key"),
            listen_model: "nova-3".to_string(),
            think_model: "gpt-4o-mini".to_string(),
            voice: "aura-2-thalia-en".to_string(),
            sample_rate: 24000,
            handshake_timeout: Duration::from_secs(1),
            keepalive_interval: Duration::from_secs(8),
        },
        log_level: Level::INFO,
        prompts_path: "./prompts".into(),
        google_token_file: "./google_tokens.json".into(),
        google_calendar_id: "primary".to_string(),
        booking_duration: chrono::Duration::minutes(30),
        relay_queue_capacity: 8,
        calendar_timeout: Duration::from_secs(1),
        terminal_grace: Duration::from_millis(200),
    }
}

pub fn test_state(credentials: FakeCredentials, calendar: FakeCalendar) -> Arc<AppState> {
    Arc::new(AppState {
        config: Arc::new(test_config()),
        credentials: Arc::new(credentials),
        calendar: Arc::new(calendar),
        system_prompt: Arc::new("Today is {today}.".to_string()),
    })
}
