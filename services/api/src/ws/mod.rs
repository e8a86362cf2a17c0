//! Voice Session Relay
//!
//! - `relay`: transport-neutral connections and the per-direction audio queues.
//! - `provider`: the conversational agent's connection, handshake and wire format.
//! - `dispatch`: maps decoded agent events onto the booking state machine.
//! - `protocol`: the terminal notices sent to the caller.
//! - `session`: the lifecycle of one caller-to-agent pairing.

mod dispatch;
pub mod protocol;
pub mod provider;
pub mod relay;
pub mod session;

pub use session::ws_handler;
