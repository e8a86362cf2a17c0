//! Scheduler API Library Crate
//!
//! Configuration, shared state, the REST handlers and the voice session
//! relay. The `api` binary is a thin wrapper around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
#[cfg(test)]
mod testing;
pub mod ws;
