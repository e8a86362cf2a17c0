//! Session Lifecycle Manager
//!
//! One [`Session`] per caller connection. The agent connection is dialed
//! before the session exists; if that fails the caller is closed with a
//! reason and nothing else happens.
//!
//! A running session is four relay tasks (a reader and a writer per side)
//! plus a control loop that owns the [`BookingMachine`]. All booking state
//! changes happen in the control loop, one event at a time. The loop never
//! waits on a peer: its own messages are offered to the writers' control
//! queues and it keeps watching all four tasks.

use super::{
    dispatch::{Directive, dispatch},
    protocol::ServerMessage,
    provider::{self, deepgram},
    relay::{self, Connection, Frame, RelayEnd, Side},
};
use crate::state::AppState;
use axum::{
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    response::Response,
};
use chrono::{DateTime, Utc};
use futures_util::{
    FutureExt,
    future::{Fuse, FusedFuture},
};
use scheduler_core::{
    BookingMachine, BookingOutcome, BookingState, CalendarWriter, CommitError, CredentialProvider,
    FailureCategory, NewEvent, booking::BookingError, calendar::{CreatedEvent, commit_event},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::{AbortHandle, JoinError, JoinHandle},
    time::{Instant, MissedTickBehavior},
};
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};
use uuid::Uuid;

/// How long teardown waits for a writer to flush before aborting it.
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// A peer that takes no frame for this long is treated as gone.
const WRITE_STALL_LIMIT: Duration = Duration::from_secs(10);

/// Replies, keepalives and notices waiting for a writer.
const CONTROL_QUEUE_CAPACITY: usize = 32;

/// Per-session settings and the shared capabilities a session uses.
#[derive(Clone)]
pub struct SessionContext {
    pub credentials: Arc<dyn CredentialProvider>,
    pub calendar: Arc<dyn CalendarWriter>,
    pub booking_duration: chrono::Duration,
    pub queue_capacity: usize,
    pub keepalive_interval: Duration,
    pub terminal_grace: Duration,
    pub write_stall_limit: Duration,
}

impl From<&AppState> for SessionContext {
    fn from(state: &AppState) -> Self {
        Self {
            credentials: state.credentials.clone(),
            calendar: state.calendar.clone(),
            booking_duration: state.config.booking_duration,
            queue_capacity: state.config.relay_queue_capacity,
            keepalive_interval: state.config.agent.keepalive_interval,
            terminal_grace: state.config.terminal_grace,
            write_stall_limit: WRITE_STALL_LIMIT,
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Teardown {
    Closed(Side),
    TransportError(Side, String),
    /// A writer stopped; its peer is unreachable.
    WriteFailed(Side, String),
    AgentError(String),
    InvariantViolation(String),
    /// The booking reached a terminal state and the grace period elapsed.
    Finished,
}

#[derive(Debug)]
pub struct SessionReport {
    pub teardown: Teardown,
    pub state: BookingState,
    pub outcome: Option<BookingOutcome>,
}

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[instrument(name = "voice_session", skip_all, fields(session_id))]
async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let session_id = Uuid::new_v4();
    tracing::Span::current().record("session_id", tracing::field::display(session_id));
    info!("Caller connected. Dialing voice agent...");
    let prompt = deepgram::render_prompt(&state.system_prompt, Utc::now());
    let settings = deepgram::settings(&state.config.agent, &prompt);

    let agent = match provider::connect(&state.config.agent, &settings).await {
        Ok(agent) => agent,
        Err(e) => {
            error!(error = %e, "Voice agent unavailable; rejecting caller");
            let close = Message::Close(Some(CloseFrame {
                code: close_code::ERROR,
                reason: e.caller_reason().into(),
            }));
            if let Err(e) = socket.send(close).await {
                debug!(error = %e, "Caller already gone");
            }
            return;
        }
    };

    let session = Session::new(session_id, SessionContext::from(state.as_ref()));
    let report = session.run(Connection::caller(socket), agent).await;
    info!(teardown = ?report.teardown, state = ?report.state, "Session finished");
}

/// One caller-to-agent pairing.
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    machine: BookingMachine,
    ctx: SessionContext,
}

struct Task<T> {
    handle: Fuse<JoinHandle<T>>,
    abort: AbortHandle,
}

impl<T> Task<T> {
    fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let handle = tokio::spawn(future.in_current_span());
        Self {
            abort: handle.abort_handle(),
            handle: handle.fuse(),
        }
    }
}

/// Awaits a writer that has not finished yet, aborting it after `limit`.
async fn flush(side: Side, writer: Task<anyhow::Result<()>>, limit: Duration) {
    let Task { handle, abort } = writer;
    if handle.is_terminated() {
        return;
    }
    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(Err(e))) => debug!(%side, error = %e, "Writer failed during teardown"),
        Ok(Err(e)) => debug!(%side, error = %e, "Writer task ended abnormally"),
        Ok(Ok(Ok(()))) => debug!(%side, "Writer flushed and closed"),
        Err(_) => {
            warn!(%side, "Writer did not flush in time; aborting");
            abort.abort();
        }
    }
}

fn reader_teardown(side: Side, end: Result<RelayEnd, JoinError>) -> Teardown {
    match end {
        Ok(RelayEnd::SourceClosed) => Teardown::Closed(side),
        Ok(RelayEnd::SourceError(e)) => Teardown::TransportError(side, e.to_string()),
        // The opposite writer stopped; its own branch reports why.
        Ok(RelayEnd::DestinationClosed) => match side {
            Side::Caller => Teardown::WriteFailed(Side::Agent, "queue closed".to_string()),
            Side::Agent => Teardown::WriteFailed(Side::Caller, "queue closed".to_string()),
        },
        Err(e) => Teardown::TransportError(side, e.to_string()),
    }
}

/// Offers a session-originated message to a writer without waiting.
fn offer(side: Side, queue: &mpsc::Sender<Frame>, text: String) -> Result<(), Teardown> {
    queue.try_send(Frame::Text(text)).map_err(|e| {
        let reason = match e {
            TrySendError::Full(_) => "peer is not reading control messages",
            TrySendError::Closed(_) => "queue closed",
        };
        Teardown::WriteFailed(side, reason.to_string())
    })
}

fn writer_teardown(side: Side, end: Result<anyhow::Result<()>, JoinError>) -> Teardown {
    match end {
        Ok(Ok(())) => Teardown::Closed(side),
        Ok(Err(e)) => Teardown::WriteFailed(side, e.to_string()),
        Err(e) => Teardown::WriteFailed(side, e.to_string()),
    }
}

impl Session {
    pub fn new(id: Uuid, ctx: SessionContext) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            machine: BookingMachine::new(ctx.booking_duration),
            ctx,
        }
    }

    /// Relays between `caller` and `agent` until either side ends or the
    /// booking finishes, then closes both.
    pub async fn run(mut self, caller: Connection, agent: Connection) -> SessionReport {
        info!(session_id = %self.id, created_at = %self.created_at, "Session started");
        let capacity = self.ctx.queue_capacity;
        let stall_limit = self.ctx.write_stall_limit;
        let (to_agent, to_agent_rx) = relay::queue(capacity);
        let (to_caller, to_caller_rx) = relay::queue(capacity);
        let (agent_control, agent_control_rx) = relay::queue(CONTROL_QUEUE_CAPACITY);
        let (caller_control, caller_control_rx) = relay::queue(CONTROL_QUEUE_CAPACITY);
        let (control_tx, mut control_rx) = mpsc::channel::<String>(capacity);
        let (commit_tx, mut commit_rx) = mpsc::channel::<Result<CreatedEvent, CommitError>>(1);

        let mut caller_reader = Task::spawn(relay::pump(Side::Caller, caller.frames, to_agent, None));
        let mut agent_reader = Task::spawn(relay::pump(Side::Agent, agent.frames, to_caller, Some(control_tx)));
        let mut caller_writer =
            Task::spawn(relay::drain(to_caller_rx, caller_control_rx, caller.sink, stall_limit));
        let mut agent_writer =
            Task::spawn(relay::drain(to_agent_rx, agent_control_rx, agent.sink, stall_limit));

        let period = self.ctx.keepalive_interval;
        let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let grace = tokio::time::sleep(Duration::MAX);
        tokio::pin!(grace);
        let mut grace_armed = false;

        let teardown = loop {
            tokio::select! {
                end = &mut caller_reader.handle => break reader_teardown(Side::Caller, end),
                end = &mut agent_reader.handle => break reader_teardown(Side::Agent, end),
                end = &mut caller_writer.handle => break writer_teardown(Side::Caller, end),
                end = &mut agent_writer.handle => break writer_teardown(Side::Agent, end),
                Some(text) = control_rx.recv() => {
                    let event = match deepgram::decode(&text) {
                        Ok(event) => event,
                        Err(e) => {
                            warn!(error = %e, "Dropping undecodable agent message");
                            continue;
                        }
                    };
                    let directives = match dispatch(&mut self.machine, event) {
                        Ok(directives) => directives,
                        Err(BookingError::InvariantViolation(detail)) => {
                            error!(%detail, "Aborting session");
                            break Teardown::InvariantViolation(detail);
                        }
                    };
                    if let Err(end) = self.apply(directives, &agent_control, &commit_tx) {
                        break end;
                    }
                }
                Some(result) = commit_rx.recv() => {
                    let (reply, outcome) = match self.machine.finish_commit(result) {
                        Ok(done) => done,
                        Err(BookingError::InvariantViolation(detail)) => {
                            error!(%detail, "Aborting session");
                            break Teardown::InvariantViolation(detail);
                        }
                    };
                    if let Err(end) = offer(Side::Agent, &agent_control, deepgram::encode_result(&reply)) {
                        warn!(?end, "Commit reply not delivered to the agent");
                    }
                    let notice = ServerMessage::from(&outcome);
                    if let Err(end) = offer(Side::Caller, &caller_control, notice.to_json()) {
                        warn!(?end, "Booking notice not delivered to the caller");
                    }
                    info!(grace = ?self.ctx.terminal_grace, "Booking finished; closing after grace period");
                    grace.as_mut().reset(Instant::now() + self.ctx.terminal_grace);
                    grace_armed = true;
                }
                _ = keepalive.tick() => {
                    if let Err(end) = offer(Side::Agent, &agent_control, deepgram::keep_alive()) {
                        debug!(?end, "Keepalive skipped");
                    }
                }
                _ = &mut grace, if grace_armed => break Teardown::Finished,
            }
        };

        info!(?teardown, state = ?self.machine.state(), "Tearing down session");

        if self.machine.outcome().is_none() {
            let category = match teardown {
                Teardown::InvariantViolation(_) => FailureCategory::Internal,
                _ => FailureCategory::Incomplete,
            };
            let notice = ServerMessage::failed(category).to_json();
            if let Err(end) = offer(Side::Caller, &caller_control, notice) {
                debug!(?end, "Final notice dropped");
            }
        }

        // Readers own the relay senders; writers close their sinks once
        // every sender is gone.
        caller_reader.abort.abort();
        agent_reader.abort.abort();
        drop(agent_control);
        drop(caller_control);
        tokio::join!(
            flush(Side::Caller, caller_writer, WRITER_FLUSH_TIMEOUT),
            flush(Side::Agent, agent_writer, WRITER_FLUSH_TIMEOUT),
        );

        SessionReport {
            teardown,
            state: self.machine.state(),
            outcome: self.machine.outcome().cloned(),
        }
    }

    fn apply(
        &self,
        directives: Vec<Directive>,
        agent_control: &mpsc::Sender<Frame>,
        commit_tx: &mpsc::Sender<Result<CreatedEvent, CommitError>>,
    ) -> Result<(), Teardown> {
        for directive in directives {
            match directive {
                Directive::Reply(result) => {
                    debug!(call_id = %result.call_id, ok = result.is_ok(), "Replying to agent");
                    offer(Side::Agent, agent_control, deepgram::encode_result(&result))?;
                }
                Directive::Commit(event) => self.spawn_commit(event, commit_tx.clone()),
                Directive::Terminate(reason) => return Err(Teardown::AgentError(reason)),
            }
        }
        Ok(())
    }

    /// The write runs to completion even if the session ends first; its
    /// result is then only logged.
    fn spawn_commit(&self, event: NewEvent, tx: mpsc::Sender<Result<CreatedEvent, CommitError>>) {
        let credentials = self.ctx.credentials.clone();
        let calendar = self.ctx.calendar.clone();
        let span = info_span!("commit", summary = %event.summary);
        tokio::spawn(
            async move {
                let result = commit_event(credentials.as_ref(), calendar.as_ref(), &event).await;
                if let Err(undelivered) = tx.send(result).await {
                    match undelivered.0 {
                        Ok(created) => warn!(event_id = %created.id, "Booking created after the session ended"),
                        Err(e) => warn!(error = %e, "Booking failed after the session ended"),
                    }
                }
            }
            .instrument(span),
        );
    }
}
