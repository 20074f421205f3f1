//! WebSocket upgrade handler and per-connection message loop.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use graymill_core::protocol::{ClientMessage, ErrorFrame, ServerMessage};
use serde::Deserialize;

use crate::dispatcher::{JobDispatcher, SubmitJobRequest};
use crate::state::AppState;
use crate::ws::registry::ConnectionRegistry;

/// Handshake query parameters. The token was issued out-of-band and
/// identifies this client session.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: String,
}

/// HTTP handler that upgrades the connection to WebSocket.
///
/// After the upgrade the connection is registered with the
/// [`ConnectionRegistry`] under its identity token and managed by two
/// tasks (sender + receiver).
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        handle_socket(socket, state.registry, state.dispatcher, query.token)
    })
}

/// Manage a single client connection after upgrade.
///
///   1. Registers the token with the registry and acks with `CONNECTED`.
///   2. Spawns a sender task that forwards registry-channel frames to the
///      WebSocket sink.
///   3. Processes inbound frames on the current task, routing job
///      submissions to the dispatcher.
///   4. Deregisters (session-guarded) on disconnect.
async fn handle_socket(
    socket: WebSocket,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<JobDispatcher>,
    token: String,
) {
    let (session_id, mut rx) = registry.register(token.clone()).await;
    tracing::info!(token = %token, session_id = %session_id, "Client connected");

    if registry.send(&token, &ServerMessage::Connected {}).await.is_err() {
        // Replaced before the ack went out; nothing left to manage.
        tracing::debug!(token = %token, "Connection replaced during handshake");
        return;
    }

    let (mut sink, mut stream) = socket.split();

    // Sender task: forward channel frames to the WebSocket sink.
    let sender_token = token.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                tracing::debug!(token = %sender_token, "WebSocket sink closed");
                break;
            }
        }
    });

    // Receiver loop: process inbound frames.
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                handle_text(&registry, &dispatcher, &token, text.as_str()).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(token = %token, "Pong received");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(token = %token, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    registry.deregister(&token, session_id).await;
    send_task.abort();
    tracing::info!(token = %token, session_id = %session_id, "Client disconnected");
}

/// Parse one inbound text frame and act on it.
///
/// Malformed requests and rejected submissions answer with an error frame
/// on the same connection; the connection itself stays open.
async fn handle_text(
    registry: &ConnectionRegistry,
    dispatcher: &JobDispatcher,
    token: &str,
    text: &str,
) {
    let request = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!(token = %token, error = %e, "Unparseable client frame");
            let _ = registry
                .send(token, &ErrorFrame::new(format!("invalid request: {e}")))
                .await;
            return;
        }
    };

    match request {
        ClientMessage::BinarizeImage { image, algorithm } => {
            match dispatcher
                .submit(token, SubmitJobRequest { image, algorithm })
                .await
            {
                Ok(job_id) => {
                    tracing::info!(token = %token, job_id = %job_id, "Job accepted");
                }
                Err(e) => {
                    tracing::info!(token = %token, error = %e, "Job rejected");
                    let _ = registry.send(token, &ErrorFrame::new(e.to_string())).await;
                }
            }
        }
    }
}
