//! HTTP routes. The gateway's surface is the WebSocket endpoint plus a
//! health check.

pub mod health;
