//! Process-wide registry of live client connections.
//!
//! The registry is the only shared mutable state in the gateway core.
//! All mutation goes through the interior `RwLock`; the lock is never
//! held across network I/O because sends go into the per-connection
//! channel, not the socket.

use std::collections::{HashMap, HashSet};

use axum::body::Bytes;
use axum::extract::ws::Message;
use graymill_core::types::{ConnectionToken, JobId, Timestamp};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};

/// Identifies one registration of a token. A token that reconnects gets a
/// fresh session id, so stale cleanup can be told apart from the live
/// successor.
pub type SessionId = uuid::Uuid;

/// Channel sender half for pushing frames to a WebSocket connection.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// Delivery failure from [`ConnectionRegistry::send`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// No live connection for the target token. Callers treat this as
    /// "stop trying to deliver", never as a reason to abort.
    #[error("no live connection for this identity")]
    NotConnected,

    /// The frame could not be serialized. The connection itself is
    /// untouched.
    #[error("failed to serialize frame: {0}")]
    Serialization(String),
}

/// State held for a single live connection.
struct Connection {
    session_id: SessionId,
    sender: WsSender,
    /// Job ids currently owned by this connection.
    jobs: HashSet<JobId>,
    /// When this connection was established.
    #[allow(dead_code)]
    connected_at: Timestamp,
}

/// Registry mapping connection identity tokens to open connections.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc` and
/// shared across the WebSocket handler, the dispatcher, and every
/// progress monitor.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionToken, Connection>>,
}

impl ConnectionRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection under its identity token.
    ///
    /// Last handshake wins: an existing entry for the same token is
    /// replaced and its channel closed. Returns the session id of the new
    /// registration and the receiver half to forward to the socket sink.
    pub async fn register(
        &self,
        token: ConnectionToken,
    ) -> (SessionId, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session_id = uuid::Uuid::new_v4();
        let mut conn = Connection {
            session_id,
            sender: tx,
            jobs: HashSet::new(),
            connected_at: chrono::Utc::now(),
        };

        let mut conns = self.connections.write().await;
        if let Some(previous) = conns.remove(&token) {
            // Jobs belong to the identity, not the socket; in-flight
            // monitors keep delivering to the successor.
            conn.jobs = previous.jobs;
            tracing::info!(
                token = %token,
                replaced_session = %previous.session_id,
                carried_jobs = conn.jobs.len(),
                "Duplicate handshake, replacing previous connection",
            );
        }
        conns.insert(token, conn);

        (session_id, rx)
    }

    /// Remove a connection, but only if the session id still matches.
    ///
    /// A socket that was replaced by a later handshake for the same token
    /// must not evict its successor during its own teardown.
    pub async fn deregister(&self, token: &str, session_id: SessionId) {
        let mut conns = self.connections.write().await;
        if conns
            .get(token)
            .is_some_and(|conn| conn.session_id == session_id)
        {
            conns.remove(token);
        }
    }

    /// Serialize a frame and queue it for delivery to a connection.
    ///
    /// Fails with [`SendError::NotConnected`] when the token has no live
    /// entry or its channel is already closed, and with
    /// [`SendError::Serialization`] when the frame cannot be encoded; it
    /// never panics the caller.
    pub async fn send<T: Serialize>(&self, token: &str, frame: &T) -> Result<(), SendError> {
        let payload = serde_json::to_string(frame).map_err(|e| {
            tracing::error!(token = %token, error = %e, "Failed to serialize frame");
            SendError::Serialization(e.to_string())
        })?;

        let conns = self.connections.read().await;
        let conn = conns.get(token).ok_or(SendError::NotConnected)?;
        conn.sender
            .send(Message::Text(payload.into()))
            .map_err(|_| SendError::NotConnected)
    }

    /// Whether a token currently has a live connection.
    pub async fn is_connected(&self, token: &str) -> bool {
        self.connections
            .read()
            .await
            .get(token)
            .is_some_and(|conn| !conn.sender.is_closed())
    }

    /// Record that a job belongs to a connection.
    pub async fn track_job(&self, token: &str, job_id: &str) {
        if let Some(conn) = self.connections.write().await.get_mut(token) {
            conn.jobs.insert(job_id.to_string());
        }
    }

    /// Drop a job from its connection's ownership set. No-op when either
    /// side is already gone.
    pub async fn untrack_job(&self, token: &str, job_id: &str) {
        if let Some(conn) = self.connections.write().await.get_mut(token) {
            conn.jobs.remove(job_id);
        }
    }

    /// Job ids currently owned by a connection.
    pub async fn owned_jobs(&self, token: &str) -> Vec<JobId> {
        self.connections
            .read()
            .await
            .get(token)
            .map(|conn| conn.jobs.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Return the current number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a Ping frame to every connected client.
    ///
    /// Used by the heartbeat task to keep connections alive and detect
    /// stale ones. Closed channels are silently skipped.
    pub async fn ping_all(&self) {
        let conns = self.connections.read().await;
        for conn in conns.values() {
            let _ = conn.sender.send(Message::Ping(Bytes::new()));
        }
    }

    /// Send a Close frame to every connection, then clear the map.
    ///
    /// Used during graceful shutdown; after this, every in-flight monitor
    /// observes a dead connection on its next liveness check.
    pub async fn shutdown_all(&self) {
        let mut conns = self.connections.write().await;
        let count = conns.len();
        for conn in conns.values() {
            let _ = conn.sender.send(Message::Close(None));
        }
        conns.clear();
        tracing::info!(count, "Closed all client connections");
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
