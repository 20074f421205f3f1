//! Graymill gateway library.
//!
//! Exposes the core building blocks (config, state, dispatcher, progress
//! monitors, WebSocket infrastructure) so integration tests and the binary
//! entrypoint can both access them.

pub mod config;
pub mod dispatcher;
pub mod monitor;
pub mod routes;
pub mod state;
pub mod ws;
