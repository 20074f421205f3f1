use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::dispatcher::JobDispatcher;
use crate::ws::ConnectionRegistry;

/// Shared application state available to all Axum handlers via
/// `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Gateway configuration.
    pub config: Arc<GatewayConfig>,
    /// Registry of live client connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Job dispatcher (validation, backend submission, monitor spawning).
    pub dispatcher: Arc<JobDispatcher>,
}
