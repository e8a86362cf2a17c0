//! Messages the server sends to the caller besides audio.

use scheduler_core::{BookingOutcome, FailureCategory};
use serde::Serialize;

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    BookingConfirmed {
        event_id: String,
        event_link: Option<String>,
        starts_at: String,
        ends_at: String,
    },
    /// Carries only a category; raw error detail stays in the logs.
    BookingFailed {
        reason: FailureCategory,
        message: String,
    },
}

impl ServerMessage {
    pub fn failed(reason: FailureCategory) -> Self {
        Self::BookingFailed {
            reason,
            message: format!("booking failed: {reason}"),
        }
    }

    pub fn to_json(&self) -> String {
        // Serializing strings and a unit enum cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl From<&BookingOutcome> for ServerMessage {
    fn from(outcome: &BookingOutcome) -> Self {
        match outcome {
            BookingOutcome::Confirmed { event, created } => Self::BookingConfirmed {
                event_id: created.id.clone(),
                event_link: created.html_link.clone(),
                starts_at: event.start.to_rfc3339(),
                ends_at: event.end.to_rfc3339(),
            },
            BookingOutcome::Failed { category } => Self::failed(*category),
        }
    }
}
