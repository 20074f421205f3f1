//! Shared types for the Graymill job-progress gateway.
//!
//! Contains the wire-message protocol spoken over the persistent client
//! connection, the client-side state reconciler that enforces the per-job
//! ordering contract, and common type aliases.

pub mod protocol;
pub mod reconciler;
pub mod types;
