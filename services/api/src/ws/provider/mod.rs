//! Agent Protocol Adapter
//!
//! Dials the conversational agent, performs the settings handshake and turns
//! its control messages into [`AgentEvent`]s.

pub mod deepgram;

use super::relay::{Connection, Frame, Wire};
use crate::config::AgentConfig;
use futures_util::{SinkExt, StreamExt};
use scheduler_core::FunctionCall;
use secrecy::ExposeSecret;
use std::time::Duration;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, client::IntoClientRequest, http::HeaderValue},
};
use tracing::{debug, info, warn};

/// Conversation progress notifications. Logged, never acted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechState {
    UserStartedSpeaking,
    AgentThinking,
    AgentStartedSpeaking,
    AgentAudioDone,
    Transcript { role: String, content: String },
}

/// A decoded control message from the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    Welcome,
    SettingsApplied,
    Speech(SpeechState),
    FunctionCalls(Vec<FunctionCall>),
    Error {
        description: String,
        code: Option<String>,
    },
    Warning {
        description: String,
    },
    Unrecognized(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AgentConnectError {
    #[error("invalid agent request: {0}")]
    InvalidRequest(String),
    #[error("could not reach the agent: {0}")]
    Connect(#[from] tungstenite::Error),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("agent rejected the session: {0}")]
    Rejected(String),
    #[error("agent closed the connection during the handshake")]
    Closed,
    #[error("could not send settings: {0}")]
    Send(String),
    #[error("agent connection failed: {0}")]
    Transport(String),
}

impl AgentConnectError {
    /// A short close reason for the caller. WebSocket close reasons are
    /// limited to 123 bytes, so the detail stays in the logs.
    pub fn caller_reason(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) | Self::Rejected(_) => "voice agent rejected the session",
            Self::Connect(_) | Self::Closed | Self::Send(_) | Self::Transport(_) => "voice agent unavailable",
            Self::Timeout(_) => "voice agent timed out",
        }
    }
}

/// Opens the agent connection and completes the handshake.
pub async fn connect(config: &AgentConfig, settings: &str) -> Result<Connection, AgentConnectError> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| AgentConnectError::InvalidRequest(e.to_string()))?;
    let auth = HeaderValue::from_str(&format!("Token {}", config.api_key.expose_secret()))
        .map_err(|e| AgentConnectError::InvalidRequest(e.to_string()))?;
    request.headers_mut().insert("Authorization", auth);

    let (ws_stream, _) = tokio::time::timeout(config.handshake_timeout, connect_async(request))
        .await
        .map_err(|_| AgentConnectError::Timeout("the agent connection"))??;
    info!(url = %config.url, "Connected to voice agent");

    let mut connection = Connection::agent(ws_stream);
    handshake(&mut connection, settings, config.handshake_timeout).await?;
    Ok(connection)
}

/// Waits for `Welcome`, sends `settings` once, then waits for `SettingsApplied`.
pub async fn handshake(
    connection: &mut Connection,
    settings: &str,
    timeout: Duration,
) -> Result<(), AgentConnectError> {
    await_event(connection, timeout, "Welcome", |e| matches!(e, AgentEvent::Welcome)).await?;
    connection
        .sink
        .send(Frame::Text(settings.to_string()))
        .await
        .map_err(|e| AgentConnectError::Send(e.to_string()))?;
    await_event(connection, timeout, "SettingsApplied", |e| {
        matches!(e, AgentEvent::SettingsApplied)
    })
    .await?;
    info!("Agent settings applied");
    Ok(())
}

async fn await_event(
    connection: &mut Connection,
    timeout: Duration,
    expected: &'static str,
    is_expected: impl Fn(&AgentEvent) -> bool,
) -> Result<(), AgentConnectError> {
    let wait = async {
        while let Some(item) = connection.frames.next().await {
            let text = match item {
                Ok(Wire::Text(text)) => text,
                Ok(Wire::Close) => return Err(AgentConnectError::Closed),
                Ok(_) => continue,
                Err(e) => return Err(AgentConnectError::Transport(e.to_string())),
            };
            match deepgram::decode(&text) {
                Ok(event) if is_expected(&event) => return Ok(()),
                Ok(AgentEvent::Error { description, code }) => {
                    warn!(%description, ?code, "Agent reported an error during the handshake");
                    return Err(AgentConnectError::Rejected(description));
                }
                Ok(event) => debug!(?event, expected, "Skipping message during handshake"),
                Err(e) => warn!(error = %e, "Undecodable message during handshake"),
            }
        }
        Err(AgentConnectError::Closed)
    };
    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| AgentConnectError::Timeout(expected))?
}
