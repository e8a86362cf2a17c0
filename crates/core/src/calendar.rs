//! Calendar Write
//!
//! The single side effect of a booking: inserting one event. The
//! [`CalendarWriter`] trait keeps the state machine independent of the
//! provider; [`GoogleCalendar`] is the production implementation.

use crate::credentials::{AccessToken, CredentialError, CredentialProvider};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

pub const GOOGLE_CALENDAR_API: &str = "https://www.googleapis.com/calendar/v3";

/// Everything needed to insert one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub summary: String,
    pub description: String,
    pub attendee_name: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    /// IANA name when the caller gave one; offsets are carried by `start`/`end`.
    pub time_zone: Option<String>,
}

/// The provider's record of a created event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedEvent {
    pub id: String,
    #[serde(rename = "htmlLink", default)]
    pub html_link: Option<String>,
}

/// A structured calendar-write failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalendarError {
    #[error("calendar authorization expired or was revoked")]
    AuthExpired,
    #[error("calendar rejected the event time range: {0}")]
    InvalidRange(String),
    #[error("calendar rate limit exceeded")]
    RateLimited,
    #[error("calendar write failed: {0}")]
    Unknown(String),
}

/// Inserts events into a calendar.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CalendarWriter: Send + Sync {
    async fn insert_event(
        &self,
        token: &AccessToken,
        event: &NewEvent,
    ) -> Result<CreatedEvent, CalendarError>;
}

/// Google Calendar v3 `events.insert`.
pub struct GoogleCalendar {
    http: reqwest::Client,
    base_url: String,
    calendar_id: String,
}

impl GoogleCalendar {
    /// Creates a client writing to `calendar_id` (usually `"primary"`).
    ///
    /// `timeout` bounds each request end to end.
    pub fn new(calendar_id: impl Into<String>, timeout: Duration) -> Result<Self, CalendarError> {
        Self::with_base_url(GOOGLE_CALENDAR_API, calendar_id, timeout)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        calendar_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CalendarError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CalendarError::Unknown(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            calendar_id: calendar_id.into(),
        })
    }

    fn events_url(&self) -> Result<reqwest::Url, CalendarError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| CalendarError::Unknown(format!("Invalid calendar base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| CalendarError::Unknown("Calendar base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["calendars", self.calendar_id.as_str(), "events"]);
        Ok(url)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventTime {
    date_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_zone: Option<String>,
}

#[derive(Serialize)]
struct EventBody<'a> {
    summary: &'a str,
    description: &'a str,
    start: EventTime,
    end: EventTime,
}

impl<'a> From<&'a NewEvent> for EventBody<'a> {
    fn from(event: &'a NewEvent) -> Self {
        let at = |dt: &DateTime<FixedOffset>| EventTime {
            date_time: dt.to_rfc3339(),
            time_zone: event.time_zone.clone(),
        };
        Self {
            summary: &event.summary,
            description: &event.description,
            start: at(&event.start),
            end: at(&event.end),
        }
    }
}

/// Maps a Google API error response onto the failure taxonomy.
fn classify_failure(status: reqwest::StatusCode, body: &str) -> CalendarError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let message = parsed["error"]["message"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string());
    let reasons: Vec<&str> = parsed["error"]["errors"]
        .as_array()
        .map(|errors| errors.iter().filter_map(|e| e["reason"].as_str()).collect())
        .unwrap_or_default();
    let rate_limited = reasons
        .iter()
        .any(|r| matches!(*r, "rateLimitExceeded" | "userRateLimitExceeded" | "quotaExceeded"));

    match status.as_u16() {
        401 => CalendarError::AuthExpired,
        429 => CalendarError::RateLimited,
        403 if rate_limited => CalendarError::RateLimited,
        400 => CalendarError::InvalidRange(message),
        code => CalendarError::Unknown(format!("{code}: {message}")),
    }
}

#[async_trait]
impl CalendarWriter for GoogleCalendar {
    async fn insert_event(
        &self,
        token: &AccessToken,
        event: &NewEvent,
    ) -> Result<CreatedEvent, CalendarError> {
        let response = self
            .http
            .post(self.events_url()?)
            .bearer_auth(token.secret())
            .json(&EventBody::from(event))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CalendarError::Unknown("calendar request timed out".to_string())
                } else {
                    CalendarError::Unknown(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        response
            .json::<CreatedEvent>()
            .await
            .map_err(|e| CalendarError::Unknown(format!("Unreadable calendar response: {e}")))
    }
}

/// A caller-safe failure label. Raw error detail stays in the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureCategory {
    AuthExpired,
    InvalidRange,
    RateLimited,
    CredentialUnavailable,
    Unknown,
    /// The session ended before a booking was committed.
    Incomplete,
    /// The session was aborted on an internal consistency failure.
    Internal,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::AuthExpired => "auth-expired",
            Self::InvalidRange => "invalid-range",
            Self::RateLimited => "rate-limited",
            Self::CredentialUnavailable => "credential-unavailable",
            Self::Unknown => "unknown",
            Self::Incomplete => "incomplete",
            Self::Internal => "internal",
        };
        f.write_str(label)
    }
}

/// Why a commit did not produce an event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommitError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Calendar(#[from] CalendarError),
}

impl CommitError {
    pub fn category(&self) -> FailureCategory {
        match self {
            Self::Credential(_) => FailureCategory::CredentialUnavailable,
            Self::Calendar(CalendarError::AuthExpired) => FailureCategory::AuthExpired,
            Self::Calendar(CalendarError::InvalidRange(_)) => FailureCategory::InvalidRange,
            Self::Calendar(CalendarError::RateLimited) => FailureCategory::RateLimited,
            Self::Calendar(CalendarError::Unknown(_)) => FailureCategory::Unknown,
        }
    }
}

/// Performs the calendar write: fetch a token, insert the event. Never retries.
pub async fn commit_event(
    credentials: &dyn CredentialProvider,
    calendar: &dyn CalendarWriter,
    event: &NewEvent,
) -> Result<CreatedEvent, CommitError> {
    let token = credentials.access_token().await.map_err(|e| {
        warn!(error = %e, "No usable calendar credentials");
        e
    })?;
    let created = calendar.insert_event(&token, event).await?;
    info!(event_id = %created.id, summary = %event.summary, "Calendar event created");
    Ok(created)
}
