//! Booking State Machine
//!
//! Collects the booking fields the agent records, gates the calendar write
//! behind an explicit confirmation, and makes sure the write is started at
//! most once per session.
//!
//! ```text
//! Collecting --request_confirmation--> Confirming --commit_booking(yes)--> Committing --> Done
//!     ^                                    |                                        \--> Failed
//!     +------ commit_booking(no) ----------+
//! ```
//!
//! The machine never performs I/O. [`BookingMachine::handle`] returns the
//! reply for the agent and, on an affirmed confirmation, the event to write;
//! the caller runs the write and feeds the outcome back through
//! [`BookingMachine::finish_commit`].

use crate::calendar::{CommitError, CreatedEvent, FailureCategory, NewEvent};
use crate::function::{FieldName, FunctionCall, FunctionRequest, FunctionResult};
use crate::schedule::{ScheduleError, StartTime, Zone, ensure_not_past, resolve_start};
use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingState {
    Collecting,
    Confirming,
    Committing,
    Done,
    Failed,
}

impl BookingState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// The structured booking assembled from the agent's `record_field` calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFields {
    pub name: Option<String>,
    pub start: Option<StartTime>,
    pub timezone: Option<Zone>,
    pub title: Option<String>,
    pub confirmed: bool,
}

impl BookingFields {
    fn clear(&mut self, field: FieldName) {
        match field {
            FieldName::Name => self.name = None,
            FieldName::DateTime => self.start = None,
            FieldName::Timezone => self.timezone = None,
            FieldName::Title => self.title = None,
        }
    }

    /// Fields that must still be recorded before a confirmation can be requested.
    pub fn missing(&self) -> Vec<FieldName> {
        let mut missing = Vec::new();
        if self.name.is_none() {
            missing.push(FieldName::Name);
        }
        match &self.start {
            None => missing.push(FieldName::DateTime),
            Some(start) if !start.has_offset() && self.timezone.is_none() => {
                missing.push(FieldName::Timezone)
            }
            Some(_) => {}
        }
        missing
    }

    /// Builds the calendar event these fields describe.
    pub fn to_event(&self, duration: Duration) -> Result<NewEvent, ScheduleError> {
        let name = self.name.clone().unwrap_or_default();
        let start = match &self.start {
            Some(start) => resolve_start(start, self.timezone.as_ref())?,
            None => return Err(ScheduleError::InvalidDateTime(String::new())),
        };
        let summary = self
            .title
            .clone()
            .unwrap_or_else(|| format!("Meeting with {name}"));
        Ok(NewEvent {
            description: format!("Booked by voice assistant. Meeting with {name}."),
            summary,
            attendee_name: name,
            start,
            end: start + duration,
            time_zone: self
                .timezone
                .as_ref()
                .and_then(Zone::iana_name)
                .map(str::to_string),
        })
    }
}

/// How a session's booking ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingOutcome {
    Confirmed { event: NewEvent, created: CreatedEvent },
    Failed { category: FailureCategory },
}

/// What the session must do after handling one function call.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Reply to send now. `None` while a commit is in flight; its reply is
    /// produced by [`BookingMachine::finish_commit`].
    pub reply: Option<FunctionResult>,
    /// Set exactly once per session: the event to write.
    pub commit: Option<NewEvent>,
}

impl Step {
    fn reply(result: FunctionResult) -> Self {
        Self {
            reply: Some(result),
            commit: None,
        }
    }
}

/// Logic errors that make the session unsafe to continue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BookingError {
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

#[derive(Debug, Clone)]
struct PendingCommit {
    call: FunctionCall,
    event: NewEvent,
}

/// Per-session booking state. Owned by exactly one session and mutated only
/// from that session's control loop.
#[derive(Debug)]
pub struct BookingMachine {
    state: BookingState,
    fields: BookingFields,
    duration: Duration,
    commit_started: bool,
    pending: Option<PendingCommit>,
    outcome: Option<BookingOutcome>,
}

impl BookingMachine {
    pub fn new(duration: Duration) -> Self {
        Self {
            state: BookingState::Collecting,
            fields: BookingFields::default(),
            duration,
            commit_started: false,
            pending: None,
            outcome: None,
        }
    }

    pub fn state(&self) -> BookingState {
        self.state
    }

    pub fn fields(&self) -> &BookingFields {
        &self.fields
    }

    pub fn outcome(&self) -> Option<&BookingOutcome> {
        self.outcome.as_ref()
    }

    /// Applies one function call from the agent.
    pub fn handle(&mut self, call: FunctionCall) -> Result<Step, BookingError> {
        debug!(call_id = %call.id, function = %call.name, state = ?self.state, "Handling function call");

        if self.state.is_terminal() {
            return Ok(Step::reply(FunctionResult::rejected(
                &call,
                "This booking session is closed; no further changes are accepted.",
            )));
        }

        match call.request.clone() {
            FunctionRequest::Unrecognized => {
                warn!(function = %call.name, "Agent called an unknown function");
                Ok(Step::reply(FunctionResult::rejected(
                    &call,
                    format!("Unknown function '{}'.", call.name),
                )))
            }
            FunctionRequest::Malformed { reason } => {
                warn!(function = %call.name, %reason, "Malformed function arguments");
                Ok(Step::reply(FunctionResult::rejected(
                    &call,
                    format!("Invalid arguments for '{}': {reason}", call.name),
                )))
            }
            FunctionRequest::RecordField { field, value } => Ok(self.record_field(&call, &field, &value)),
            FunctionRequest::RequestConfirmation => Ok(self.request_confirmation(&call)),
            FunctionRequest::CommitBooking {
                confirmed,
                disputed_field,
            } => self.commit_booking(call, confirmed, disputed_field),
        }
    }

    fn record_field(&mut self, call: &FunctionCall, field: &str, value: &str) -> Step {
        if self.state == BookingState::Committing {
            return Step::reply(FunctionResult::rejected(
                call,
                "The booking is being saved; fields can no longer change.",
            ));
        }

        let field = match field.parse::<FieldName>() {
            Ok(field) => field,
            Err(e) => return Step::reply(FunctionResult::rejected(call, e.to_string())),
        };
        let value = value.trim();

        let applied = match field {
            FieldName::Name if value.is_empty() => Err("name cannot be empty".to_string()),
            FieldName::Name => {
                self.fields.name = Some(value.to_string());
                Ok(())
            }
            FieldName::DateTime => StartTime::parse(value)
                .map(|start| self.fields.start = Some(start))
                .map_err(|e| e.to_string()),
            FieldName::Timezone => Zone::parse(value)
                .map(|zone| self.fields.timezone = Some(zone))
                .map_err(|e| e.to_string()),
            // An empty title means the caller declined to give one.
            FieldName::Title => {
                self.fields.title = Some(value.to_string()).filter(|t| !t.is_empty());
                Ok(())
            }
        };

        if let Err(reason) = applied {
            return Step::reply(FunctionResult::rejected(call, reason));
        }

        if self.state == BookingState::Confirming {
            info!(%field, "Field changed during confirmation; recap invalidated");
            self.state = BookingState::Collecting;
            self.fields.confirmed = false;
        }

        Step::reply(FunctionResult::with_body(
            call,
            json!({
                "ok": true,
                "message": format!("Recorded {field}."),
                "missing": self.fields.missing(),
            }),
        ))
    }

    fn request_confirmation(&mut self, call: &FunctionCall) -> Step {
        if self.state == BookingState::Committing {
            return Step::reply(FunctionResult::rejected(call, "The booking is already being saved."));
        }

        let missing = self.fields.missing();
        if !missing.is_empty() {
            return Step::reply(FunctionResult::with_body(
                call,
                json!({
                    "ok": false,
                    "error": "Cannot confirm yet; some details are missing.",
                    "missing": missing,
                }),
            ));
        }

        let event = match self.fields.to_event(self.duration) {
            Ok(event) => event,
            Err(e) => return Step::reply(FunctionResult::rejected(call, e.to_string())),
        };
        if let Err(e) = ensure_not_past(event.start, Utc::now()) {
            info!(start = %event.start, "Requested start is in the past");
            return Step::reply(FunctionResult::with_body(
                call,
                json!({
                    "ok": false,
                    "error": format!("{e}; ask the caller for a future date and time."),
                    "missing": [FieldName::DateTime],
                }),
            ));
        }

        self.state = BookingState::Confirming;
        self.fields.confirmed = false;
        info!(attendee = %event.attendee_name, start = %event.start, "Awaiting confirmation");
        Step::reply(FunctionResult::with_body(
            call,
            json!({
                "ok": true,
                "message": "Read this recap to the caller and ask for an explicit yes or no.",
                "recap": {
                    "name": event.attendee_name,
                    "title": event.summary,
                    "start": event.start.to_rfc3339(),
                    "end": event.end.to_rfc3339(),
                    "timezone": self.fields.timezone.map(|zone| zone.to_string()),
                    "duration_minutes": self.duration.num_minutes(),
                },
            }),
        ))
    }

    fn commit_booking(
        &mut self,
        call: FunctionCall,
        confirmed: bool,
        disputed_field: Option<String>,
    ) -> Result<Step, BookingError> {
        match self.state {
            BookingState::Collecting => Ok(Step::reply(FunctionResult::rejected(
                &call,
                "Request confirmation before committing the booking.",
            ))),
            BookingState::Committing => Ok(Step::reply(FunctionResult::rejected(
                &call,
                "The booking is already being saved.",
            ))),
            BookingState::Confirming if !confirmed => Ok(Step::reply(self.revert(&call, disputed_field))),
            BookingState::Confirming => self.begin_commit(call).map(|event| Step {
                reply: None,
                commit: Some(event),
            }),
            BookingState::Done | BookingState::Failed => Err(BookingError::InvariantViolation(
                "terminal state reached commit handling".to_string(),
            )),
        }
    }

    fn revert(&mut self, call: &FunctionCall, disputed_field: Option<String>) -> FunctionResult {
        let disputed = match disputed_field.as_deref().map(str::parse::<FieldName>) {
            None => None,
            Some(Ok(field)) => Some(field),
            Some(Err(e)) => return FunctionResult::rejected(call, e.to_string()),
        };

        if let Some(field) = disputed {
            self.fields.clear(field);
        }
        self.fields.confirmed = false;
        self.state = BookingState::Collecting;
        info!(disputed = ?disputed, "Caller declined the recap");

        FunctionResult::with_body(
            call,
            json!({
                "ok": true,
                "message": "Not booked. Ask the caller for the corrected details.",
                "cleared": disputed,
                "missing": self.fields.missing(),
            }),
        )
    }

    /// Sets the commit guard before any I/O can start. A second attempt is a
    /// logic error in the caller, not caller input.
    fn begin_commit(&mut self, call: FunctionCall) -> Result<NewEvent, BookingError> {
        if self.commit_started {
            return Err(BookingError::InvariantViolation("commit attempted twice".to_string()));
        }
        let event = self.fields.to_event(self.duration).map_err(|e| {
            BookingError::InvariantViolation(format!("confirmed fields no longer resolve: {e}"))
        })?;

        self.commit_started = true;
        self.fields.confirmed = true;
        self.state = BookingState::Committing;
        self.pending = Some(PendingCommit {
            call,
            event: event.clone(),
        });
        info!(summary = %event.summary, start = %event.start, "Booking confirmed; committing");
        Ok(event)
    }

    /// Records the outcome of the calendar write and produces the deferred
    /// reply to the `commit_booking` call.
    pub fn finish_commit(
        &mut self,
        result: Result<CreatedEvent, CommitError>,
    ) -> Result<(FunctionResult, BookingOutcome), BookingError> {
        let pending = match (self.state, self.pending.take()) {
            (BookingState::Committing, Some(pending)) => pending,
            (state, _) => {
                return Err(BookingError::InvariantViolation(format!(
                    "commit result arrived in state {state:?}"
                )));
            }
        };

        let (reply, outcome) = match result {
            Ok(created) => {
                self.state = BookingState::Done;
                let reply = FunctionResult::with_body(
                    &pending.call,
                    json!({
                        "ok": true,
                        "message": "Booked. Tell the caller it is confirmed.",
                        "event_id": created.id,
                        "start": pending.event.start.to_rfc3339(),
                    }),
                );
                (reply, BookingOutcome::Confirmed {
                    event: pending.event,
                    created,
                })
            }
            Err(e) => {
                self.state = BookingState::Failed;
                let category = e.category();
                warn!(error = %e, %category, "Booking failed");
                let reply = FunctionResult::with_body(
                    &pending.call,
                    json!({
                        "ok": false,
                        "error": format!("The calendar could not save the booking ({category})."),
                        "category": category,
                    }),
                );
                (reply, BookingOutcome::Failed { category })
            }
        };
        self.outcome = Some(outcome.clone());
        Ok((reply, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::CalendarError;
    use crate::credentials::CredentialError;
    use crate::function::{COMMIT_BOOKING, RECORD_FIELD, REQUEST_CONFIRMATION};
    use chrono::{TimeZone, Utc};

    fn record(id: &str, field: &str, value: &str) -> FunctionCall {
        FunctionCall::new(
            id,
            RECORD_FIELD,
            FunctionRequest::RecordField {
                field: field.to_string(),
                value: value.to_string(),
            },
        )
    }

    fn confirm_request(id: &str) -> FunctionCall {
        FunctionCall::new(id, REQUEST_CONFIRMATION, FunctionRequest::RequestConfirmation)
    }

    fn commit(id: &str, confirmed: bool, disputed: Option<&str>) -> FunctionCall {
        FunctionCall::new(
            id,
            COMMIT_BOOKING,
            FunctionRequest::CommitBooking {
                confirmed,
                disputed_field: disputed.map(str::to_string),
            },
        )
    }

    fn new_machine() -> BookingMachine {
        BookingMachine::new(Duration::minutes(30))
    }

    fn reply(machine: &mut BookingMachine, call: FunctionCall) -> FunctionResult {
        machine.handle(call).unwrap().reply.expect("expected an immediate reply")
    }

    fn ready_machine() -> BookingMachine {
        let mut machine = new_machine();
        assert!(reply(&mut machine, record("1", "name", "Ada")).is_ok());
        assert!(reply(&mut machine, record("2", "datetime", "2030-03-01T10:00")).is_ok());
        assert!(reply(&mut machine, record("3", "timezone", "UTC")).is_ok());
        machine
    }

    fn created(id: &str) -> CreatedEvent {
        CreatedEvent {
            id: id.to_string(),
            html_link: None,
        }
    }

    #[test]
    fn test_happy_path_books_once() {
        let mut machine = ready_machine();

        let recap = reply(&mut machine, confirm_request("4"));
        assert!(recap.is_ok());
        assert_eq!(recap.call_id, "4");
        assert_eq!(machine.state(), BookingState::Confirming);
        assert_eq!(recap.body["recap"]["title"], "Meeting with Ada");

        let step = machine.handle(commit("5", true, None)).unwrap();
        assert!(step.reply.is_none());
        let event = step.commit.expect("affirmed confirmation should commit");
        assert_eq!(machine.state(), BookingState::Committing);
        assert!(machine.fields().confirmed);
        assert_eq!(event.start.with_timezone(&Utc), Utc.with_ymd_and_hms(2030, 3, 1, 10, 0, 0).unwrap());
        assert_eq!(event.end - event.start, Duration::minutes(30));
        assert_eq!(event.time_zone.as_deref(), Some("UTC"));

        let (result, outcome) = machine.finish_commit(Ok(created("evt_1"))).unwrap();
        assert_eq!(result.call_id, "5");
        assert_eq!(result.body["event_id"], "evt_1");
        assert_eq!(machine.state(), BookingState::Done);
        match outcome {
            BookingOutcome::Confirmed { created, .. } => assert_eq!(created.id, "evt_1"),
            other => panic!("expected confirmation, got {:?}", other),
        }
    }

    #[test]
    fn test_last_write_wins_per_field() {
        let mut machine = new_machine();
        reply(&mut machine, record("1", "name", "Ada"));
        reply(&mut machine, record("2", "title", "Sync"));
        reply(&mut machine, confirm_request("3"));
        reply(&mut machine, record("4", "name", "Grace"));
        reply(&mut machine, record("5", "title", "Planning"));

        assert_eq!(machine.fields().name.as_deref(), Some("Grace"));
        assert_eq!(machine.fields().title.as_deref(), Some("Planning"));
        assert_eq!(machine.state(), BookingState::Collecting);
    }

    #[test]
    fn test_unknown_field_is_rejected_without_change() {
        let mut machine = ready_machine();
        let before = machine.fields().clone();

        let result = reply(&mut machine, record("9", "email", "ada@example.com"));
        assert!(!result.is_ok());
        assert!(result.body["error"].as_str().unwrap().contains("email"));
        assert_eq!(machine.fields(), &before);
        assert_eq!(machine.state(), BookingState::Collecting);
    }

    #[test]
    fn test_invalid_values_are_rejected_without_change() {
        let mut machine = ready_machine();
        let before = machine.fields().clone();

        assert!(!reply(&mut machine, record("a", "datetime", "sometime soon")).is_ok());
        assert!(!reply(&mut machine, record("b", "timezone", "Narnia/Cair")).is_ok());
        assert!(!reply(&mut machine, record("c", "name", "   ")).is_ok());
        assert_eq!(machine.fields(), &before);
    }

    #[test]
    fn test_confirmation_requires_name_and_datetime() {
        let orderings: Vec<Vec<FunctionCall>> = vec![
            vec![],
            vec![record("1", "name", "Ada")],
            vec![record("1", "datetime", "2030-03-01T10:00+00:00")],
            vec![record("1", "timezone", "UTC"), record("2", "title", "Sync")],
        ];

        for calls in orderings {
            let mut machine = new_machine();
            for call in calls {
                reply(&mut machine, call);
            }
            let result = reply(&mut machine, confirm_request("c"));
            assert!(!result.is_ok());
            assert!(!result.body["missing"].as_array().unwrap().is_empty());
            assert_eq!(machine.state(), BookingState::Collecting);
        }
    }

    #[test]
    fn test_local_datetime_without_timezone_is_never_defaulted() {
        let mut machine = new_machine();
        reply(&mut machine, record("1", "name", "Ada"));
        reply(&mut machine, record("2", "datetime", "2030-03-01T10:00"));

        let result = reply(&mut machine, confirm_request("3"));
        assert!(!result.is_ok());
        assert_eq!(result.body["missing"], json!(["timezone"]));
        assert_eq!(machine.state(), BookingState::Collecting);
    }

    #[test]
    fn test_past_start_is_not_confirmed() {
        let mut machine = new_machine();
        reply(&mut machine, record("1", "name", "Ada"));
        reply(&mut machine, record("2", "datetime", "2020-01-01T10:00"));
        reply(&mut machine, record("3", "timezone", "UTC"));

        let result = reply(&mut machine, confirm_request("4"));
        assert!(!result.is_ok());
        assert!(result.body["error"].as_str().unwrap().contains("in the past"));
        assert_eq!(result.body["missing"], json!(["datetime"]));
        assert_eq!(machine.state(), BookingState::Collecting);

        // Correcting the date unblocks the recap.
        reply(&mut machine, record("5", "datetime", "2030-03-01T10:00"));
        assert!(reply(&mut machine, confirm_request("6")).is_ok());
        assert_eq!(machine.state(), BookingState::Confirming);
    }

    #[test]
    fn test_datetime_with_own_offset_needs_no_timezone() {
        let mut machine = new_machine();
        reply(&mut machine, record("1", "name", "Ada"));
        reply(&mut machine, record("2", "datetime", "2030-03-01T10:00:00+01:00"));

        assert!(reply(&mut machine, confirm_request("3")).is_ok());
        let event = machine.handle(commit("4", true, None)).unwrap().commit.unwrap();
        assert_eq!(event.start.offset().local_minus_utc(), 3600);
        assert_eq!(event.time_zone, None);
    }

    #[test]
    fn test_commit_before_confirmation_is_rejected() {
        let mut machine = ready_machine();
        let step = machine.handle(commit("1", true, None)).unwrap();
        assert!(step.commit.is_none());
        assert!(!step.reply.unwrap().is_ok());
        assert_eq!(machine.state(), BookingState::Collecting);
    }

    #[test]
    fn test_negative_answer_reverts_and_clears_disputed_field() {
        let mut machine = ready_machine();
        reply(&mut machine, confirm_request("1"));

        let result = reply(&mut machine, commit("2", false, Some("datetime")));
        assert!(result.is_ok());
        assert_eq!(result.body["cleared"], "datetime");
        assert_eq!(machine.state(), BookingState::Collecting);
        assert!(machine.fields().start.is_none());
        assert_eq!(machine.fields().name.as_deref(), Some("Ada"));
        assert!(!machine.fields().confirmed);
    }

    #[test]
    fn test_negative_answer_with_unknown_field_is_rejected() {
        let mut machine = ready_machine();
        reply(&mut machine, confirm_request("1"));

        let result = reply(&mut machine, commit("2", false, Some("email")));
        assert!(!result.is_ok());
        assert_eq!(machine.state(), BookingState::Confirming);
    }

    #[test]
    fn test_duplicate_affirmations_commit_once() {
        let mut machine = ready_machine();
        reply(&mut machine, confirm_request("1"));

        let commits: usize = (0..5)
            .map(|i| machine.handle(commit(&format!("c{i}"), true, None)).unwrap())
            .filter(|step| step.commit.is_some())
            .count();
        assert_eq!(commits, 1);
        assert_eq!(machine.state(), BookingState::Committing);

        machine.finish_commit(Ok(created("evt"))).unwrap();
        let late = machine.handle(commit("late", true, None)).unwrap();
        assert!(late.commit.is_none());
        assert!(late.reply.unwrap().body["error"].as_str().unwrap().contains("closed"));
    }

    #[test]
    fn test_fields_frozen_while_committing() {
        let mut machine = ready_machine();
        reply(&mut machine, confirm_request("1"));
        machine.handle(commit("2", true, None)).unwrap();

        assert!(!reply(&mut machine, record("3", "name", "Grace")).is_ok());
        assert_eq!(machine.fields().name.as_deref(), Some("Ada"));
    }

    #[test]
    fn test_rate_limited_commit_fails_without_retry() {
        let mut machine = ready_machine();
        reply(&mut machine, confirm_request("1"));
        machine.handle(commit("2", true, None)).unwrap();

        let (result, outcome) = machine
            .finish_commit(Err(CommitError::Calendar(CalendarError::RateLimited)))
            .unwrap();
        assert!(!result.is_ok());
        assert_eq!(result.call_id, "2");
        assert_eq!(result.body["category"], "rate-limited");
        assert_eq!(outcome, BookingOutcome::Failed { category: FailureCategory::RateLimited });
        assert_eq!(machine.state(), BookingState::Failed);

        // A fresh affirmation does not start a second write.
        let step = machine.handle(commit("3", true, None)).unwrap();
        assert!(step.commit.is_none());
        assert!(!reply(&mut machine, confirm_request("4")).is_ok());
        assert!(!reply(&mut machine, record("5", "name", "Grace")).is_ok());
        assert_eq!(machine.fields().name.as_deref(), Some("Ada"));
    }

    #[test]
    fn test_credential_failure_is_categorized() {
        let mut machine = ready_machine();
        reply(&mut machine, confirm_request("1"));
        machine.handle(commit("2", true, None)).unwrap();

        let (_, outcome) = machine
            .finish_commit(Err(CommitError::Credential(CredentialError::NotConnected)))
            .unwrap();
        assert_eq!(
            outcome,
            BookingOutcome::Failed { category: FailureCategory::CredentialUnavailable }
        );
    }

    #[test]
    fn test_commit_result_without_commit_is_invariant_violation() {
        let mut machine = ready_machine();
        assert!(matches!(
            machine.finish_commit(Ok(created("x"))),
            Err(BookingError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_unrecognized_and_malformed_calls_do_not_change_state() {
        let mut machine = ready_machine();
        let before = machine.fields().clone();

        let unknown = FunctionCall::new("u", "send_email", FunctionRequest::Unrecognized);
        assert!(!reply(&mut machine, unknown).is_ok());

        let malformed = FunctionCall::new(
            "m",
            RECORD_FIELD,
            FunctionRequest::Malformed { reason: "missing field `value`".to_string() },
        );
        let result = reply(&mut machine, malformed);
        assert!(result.body["error"].as_str().unwrap().contains("missing field"));

        assert_eq!(machine.fields(), &before);
        assert_eq!(machine.state(), BookingState::Collecting);
    }

    #[test]
    fn test_empty_title_falls_back_to_default() {
        let mut machine = ready_machine();
        reply(&mut machine, record("t", "title", ""));
        assert!(machine.fields().title.is_none());

        let event = machine.fields().to_event(Duration::minutes(45)).unwrap();
        assert_eq!(event.summary, "Meeting with Ada");
        assert_eq!(event.end - event.start, Duration::minutes(45));
    }
}
