//! Booking logic for the voice scheduling agent.
//!
//! Everything here is transport-agnostic: the relay service feeds decoded
//! function calls into a [`booking::BookingMachine`] and runs the calendar
//! write it asks for.

pub mod booking;
pub mod calendar;
pub mod credentials;
pub mod function;
pub mod schedule;

pub use booking::{BookingMachine, BookingOutcome, BookingState, Step};
pub use calendar::{CalendarWriter, CommitError, FailureCategory, GoogleCalendar, NewEvent};
pub use credentials::{CredentialProvider, GoogleTokenProvider};
pub use function::{FunctionCall, FunctionRequest, FunctionResult};
