//! Routes decoded agent events into the booking state machine.

use super::provider::{AgentEvent, SpeechState};
use scheduler_core::booking::{BookingError, BookingMachine};
use scheduler_core::{FunctionResult, NewEvent};
use tracing::{debug, error, info, warn};

/// Work the session must carry out after one agent event.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Send this result back to the agent.
    Reply(FunctionResult),
    /// Start the calendar write for this event.
    Commit(NewEvent),
    /// The agent reported a session error; end the session.
    Terminate(String),
}

/// Applies one event. An `Err` means the session must abort.
pub fn dispatch(machine: &mut BookingMachine, event: AgentEvent) -> Result<Vec<Directive>, BookingError> {
    match event {
        AgentEvent::FunctionCalls(calls) => {
            let mut directives = Vec::with_capacity(calls.len());
            for call in calls {
                let step = machine.handle(call)?;
                directives.extend(step.reply.map(Directive::Reply));
                directives.extend(step.commit.map(Directive::Commit));
            }
            Ok(directives)
        }
        AgentEvent::Speech(SpeechState::Transcript { role, content }) => {
            info!(%role, %content, "Conversation");
            Ok(Vec::new())
        }
        AgentEvent::Speech(state) => {
            debug!(?state, "Speech state");
            Ok(Vec::new())
        }
        AgentEvent::Error { description, code } => {
            error!(%description, ?code, "Agent reported an error");
            Ok(vec![Directive::Terminate(description)])
        }
        AgentEvent::Warning { description } => {
            warn!(%description, "Agent warning");
            Ok(Vec::new())
        }
        AgentEvent::Welcome | AgentEvent::SettingsApplied => {
            debug!(?event, "Late handshake message");
            Ok(Vec::new())
        }
        AgentEvent::Unrecognized(kind) => {
            warn!(%kind, "Dropping unrecognized agent message");
            Ok(Vec::new())
        }
    }
}
