//! Function calls exchanged with the conversational agent.
//!
//! The agent drives the booking by invoking a small, closed set of functions.
//! Every call carries a correlation id that must be echoed on the result so
//! the agent can match it to the call that produced it.

use serde::Serialize;
use serde_json::{Value, json};
use std::fmt;
use std::str::FromStr;

pub const RECORD_FIELD: &str = "record_field";
pub const REQUEST_CONFIRMATION: &str = "request_confirmation";
pub const COMMIT_BOOKING: &str = "commit_booking";

/// A booking field the agent is allowed to record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldName {
    Name,
    DateTime,
    Timezone,
    Title,
}

impl FieldName {
    pub const ALL: [FieldName; 4] = [Self::Name, Self::DateTime, Self::Timezone, Self::Title];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::DateTime => "datetime",
            Self::Timezone => "timezone",
            Self::Title => "title",
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown field '{0}'; expected one of name, datetime, timezone, title")]
pub struct UnknownField(pub String);

impl FromStr for FieldName {
    type Err = UnknownField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "name" => Ok(Self::Name),
            "datetime" => Ok(Self::DateTime),
            "timezone" => Ok(Self::Timezone),
            "title" => Ok(Self::Title),
            _ => Err(UnknownField(s.to_string())),
        }
    }
}

/// What the agent asked for, decoded from the function name and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionRequest {
    /// Store `value` under `field`. The field name is validated by the booking
    /// state machine, not by the decoder.
    RecordField { field: String, value: String },
    RequestConfirmation,
    /// The caller's answer to the recap: `confirmed = false` carries the field
    /// they disputed, if they named one.
    CommitBooking {
        confirmed: bool,
        disputed_field: Option<String>,
    },
    /// A known function whose arguments could not be decoded.
    Malformed { reason: String },
    /// A function name outside the declared set.
    Unrecognized,
}

/// A single function invocation from the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    /// Correlation id, echoed on the result.
    pub id: String,
    pub name: String,
    pub request: FunctionRequest,
}

impl FunctionCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, request: FunctionRequest) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            request,
        }
    }
}

/// The answer to a [`FunctionCall`], routed back to the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionResult {
    pub call_id: String,
    pub name: String,
    pub body: Value,
}

impl FunctionResult {
    /// The request was refused; the agent should read `error` and adapt.
    pub fn rejected(call: &FunctionCall, error: impl Into<String>) -> Self {
        Self::with_body(call, json!({ "ok": false, "error": error.into() }))
    }

    pub fn with_body(call: &FunctionCall, body: Value) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            body,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.body.get("ok").and_then(Value::as_bool).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_name_parsing() {
        assert_eq!("name".parse::<FieldName>().unwrap(), FieldName::Name);
        assert_eq!(" DateTime ".parse::<FieldName>().unwrap(), FieldName::DateTime);
        assert_eq!("timezone".parse::<FieldName>().unwrap(), FieldName::Timezone);
        assert_eq!("title".parse::<FieldName>().unwrap(), FieldName::Title);

        let err = "email".parse::<FieldName>().unwrap_err();
        assert_eq!(err, UnknownField("email".to_string()));
        assert!(err.to_string().contains("email"));
    }

    #[test]
    fn test_field_name_display_matches_wire_name() {
        for field in FieldName::ALL {
            assert_eq!(field.to_string().parse::<FieldName>().unwrap(), field);
        }
    }

    #[test]
    fn test_results_echo_correlation_id() {
        let call = FunctionCall::new("fc_42", RECORD_FIELD, FunctionRequest::RequestConfirmation);

        let ok = FunctionResult::with_body(&call, json!({ "ok": true, "message": "done" }));
        assert_eq!(ok.call_id, "fc_42");
        assert_eq!(ok.name, RECORD_FIELD);
        assert!(ok.is_ok());
        assert_eq!(ok.body["message"], "done");

        let rejected = FunctionResult::rejected(&call, "nope");
        assert_eq!(rejected.call_id, "fc_42");
        assert!(!rejected.is_ok());
        assert_eq!(rejected.body["error"], "nope");
    }
}
