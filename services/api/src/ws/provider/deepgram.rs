//! Deepgram Voice Agent wire format (v1).

use super::{AgentEvent, SpeechState};
use crate::config::AgentConfig;
use chrono::{DateTime, Utc};
use scheduler_core::function::{
    COMMIT_BOOKING, FunctionCall, FunctionRequest, FunctionResult, RECORD_FIELD,
    REQUEST_CONFIRMATION,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

pub const GREETING: &str = "Hi! I can put a meeting on the calendar for you. May I have your name?";

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("control message is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("control message has no `type`")]
    MissingType,
}

#[derive(Deserialize)]
struct ConversationText {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct FunctionCallRequest {
    functions: Vec<Value>,
}

#[derive(Deserialize)]
struct RequestedFunction {
    id: String,
    name: String,
    #[serde(default)]
    arguments: String,
    #[serde(default = "default_client_side")]
    client_side: bool,
}

fn default_client_side() -> bool {
    true
}

#[derive(Deserialize)]
struct Notice {
    #[serde(default, alias = "message")]
    description: String,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Deserialize)]
struct RecordFieldArgs {
    field: String,
    value: Value,
}

#[derive(Deserialize)]
struct CommitBookingArgs {
    confirmed: bool,
    #[serde(default)]
    disputed_field: Option<String>,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum Outbound<'a> {
    FunctionCallResponse {
        id: &'a str,
        name: &'a str,
        content: String,
    },
    KeepAlive,
}

/// Decodes one inbound text message.
pub fn decode(text: &str) -> Result<AgentEvent, DecodeError> {
    let value: Value = serde_json::from_str(text)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)?
        .to_string();

    let event = match kind.as_str() {
        "Welcome" => AgentEvent::Welcome,
        "SettingsApplied" => AgentEvent::SettingsApplied,
        "UserStartedSpeaking" => AgentEvent::Speech(SpeechState::UserStartedSpeaking),
        "AgentThinking" => AgentEvent::Speech(SpeechState::AgentThinking),
        "AgentStartedSpeaking" => AgentEvent::Speech(SpeechState::AgentStartedSpeaking),
        "AgentAudioDone" => AgentEvent::Speech(SpeechState::AgentAudioDone),
        "ConversationText" => {
            let text: ConversationText = serde_json::from_value(value)?;
            AgentEvent::Speech(SpeechState::Transcript {
                role: text.role,
                content: text.content,
            })
        }
        "FunctionCallRequest" => {
            let request: FunctionCallRequest = serde_json::from_value(value)?;
            AgentEvent::FunctionCalls(
                request
                    .functions
                    .into_iter()
                    .filter_map(requested_function)
                    .filter(|f| f.client_side)
                    .map(|f| FunctionCall::new(f.id, f.name.clone(), decode_arguments(&f.name, &f.arguments)))
                    .collect(),
            )
        }
        "Error" => {
            let notice: Notice = serde_json::from_value(value)?;
            AgentEvent::Error {
                description: notice.description,
                code: notice.code,
            }
        }
        "Warning" => {
            let notice: Notice = serde_json::from_value(value)?;
            AgentEvent::Warning {
                description: notice.description,
            }
        }
        _ => AgentEvent::Unrecognized(kind),
    };
    Ok(event)
}

/// An entry without an id or name cannot be answered, so it is skipped
/// without affecting its siblings.
fn requested_function(entry: Value) -> Option<RequestedFunction> {
    match serde_json::from_value(entry) {
        Ok(function) => Some(function),
        Err(e) => {
            warn!(error = %e, "Skipping undecodable function call entry");
            None
        }
    }
}

/// Arguments arrive as a JSON-encoded string. Decoding failures become
/// [`FunctionRequest::Malformed`] so the agent gets an error reply.
fn decode_arguments(name: &str, arguments: &str) -> FunctionRequest {
    let arguments = match arguments.trim() {
        "" => "{}",
        raw => raw,
    };
    let malformed = |e: serde_json::Error| FunctionRequest::Malformed {
        reason: e.to_string(),
    };

    match name {
        RECORD_FIELD => match serde_json::from_str::<RecordFieldArgs>(arguments) {
            Ok(args) => FunctionRequest::RecordField {
                field: args.field,
                value: match args.value {
                    Value::String(s) => s,
                    other => other.to_string(),
                },
            },
            Err(e) => malformed(e),
        },
        REQUEST_CONFIRMATION => FunctionRequest::RequestConfirmation,
        COMMIT_BOOKING => match serde_json::from_str::<CommitBookingArgs>(arguments) {
            Ok(args) => FunctionRequest::CommitBooking {
                confirmed: args.confirmed,
                disputed_field: args.disputed_field.filter(|f| !f.trim().is_empty()),
            },
            Err(e) => malformed(e),
        },
        _ => FunctionRequest::Unrecognized,
    }
}

pub fn encode_result(result: &FunctionResult) -> String {
    let message = Outbound::FunctionCallResponse {
        id: &result.call_id,
        name: &result.name,
        content: result.body.to_string(),
    };
    // Serializing a struct of strings cannot fail.
    serde_json::to_string(&message).unwrap_or_default()
}

pub fn keep_alive() -> String {
    serde_json::to_string(&Outbound::KeepAlive).unwrap_or_default()
}

/// Substitutes the per-session placeholders in the agent instructions.
pub fn render_prompt(template: &str, now: DateTime<Utc>) -> String {
    template
        .replace("{today}", &now.format("%A, %B %-d, %Y").to_string())
        .replace("{now_utc}", &now.to_rfc3339())
}

fn function_declarations() -> Value {
    json!([
        {
            "name": RECORD_FIELD,
            "description": "Store one booking detail as soon as the caller provides it. Call again to correct a value.",
            "parameters": {
                "type": "object",
                "properties": {
                    "field": {
                        "type": "string",
                        "enum": ["name", "datetime", "timezone", "title"],
                        "description": "Which detail is being recorded."
                    },
                    "value": {
                        "type": "string",
                        "description": "The value. For datetime use ISO 8601 such as 2025-03-01T10:00. For timezone use an IANA name such as Europe/Berlin or an offset such as UTC+2."
                    }
                },
                "required": ["field", "value"]
            }
        },
        {
            "name": REQUEST_CONFIRMATION,
            "description": "Ask the system to validate the collected details and return a recap to read to the caller.",
            "parameters": { "type": "object", "properties": {} }
        },
        {
            "name": COMMIT_BOOKING,
            "description": "Report the caller's answer to the recap. Only pass confirmed=true after an explicit yes.",
            "parameters": {
                "type": "object",
                "properties": {
                    "confirmed": {
                        "type": "boolean",
                        "description": "True only if the caller explicitly agreed to the recap."
                    },
                    "disputed_field": {
                        "type": "string",
                        "enum": ["name", "datetime", "timezone", "title"],
                        "description": "When the caller said no, the detail they want to change."
                    }
                },
                "required": ["confirmed"]
            }
        }
    ])
}

/// The one `Settings` message sent after `Welcome`.
pub fn settings(config: &AgentConfig, prompt: &str) -> String {
    json!({
        "type": "Settings",
        "audio": {
            "input": { "encoding": "linear16", "sample_rate": config.sample_rate },
            "output": { "encoding": "linear16", "sample_rate": config.sample_rate, "container": "none" }
        },
        "agent": {
            "language": "en",
            "listen": { "provider": { "type": "deepgram", "model": config.listen_model } },
            "think": {
                "provider": { "type": "open_ai", "model": config.think_model },
                "prompt": prompt,
                "functions": function_declarations()
            },
            "speak": { "provider": { "type": "deepgram", "model": config.voice } },
            "greeting": GREETING
        }
    })
    .to_string()
}
