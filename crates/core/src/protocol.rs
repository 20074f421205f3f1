//! Wire-message vocabulary for the persistent client connection.
//!
//! Every frame is a single JSON object. Frames from the client are tagged
//! by `action`, frames from the gateway by `status`. The shapes here are
//! the protocol contract; tests pin them against the literal JSON.

use serde::{Deserialize, Serialize};

use crate::types::JobId;

/// Default binarization algorithm when the client omits the field.
pub const DEFAULT_ALGORITHM: &str = "niblack";

fn default_algorithm() -> String {
    DEFAULT_ALGORITHM.to_string()
}

/// Frames sent by the client to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ClientMessage {
    /// Submit an image-binarization job.
    ///
    /// `image` carries the base64-encoded source image; `algorithm`
    /// defaults to [`DEFAULT_ALGORITHM`] when omitted.
    #[serde(rename = "binarize_image")]
    BinarizeImage {
        image: String,
        #[serde(default = "default_algorithm")]
        algorithm: String,
    },
}

/// Frames sent by the gateway to the client.
///
/// Ordering contract per `task_id`: `Started` precedes any `Progress`;
/// `Progress` values are non-decreasing; exactly one of
/// `Completed`/`Failed` is the last frame for that job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum ServerMessage {
    /// Handshake acknowledgement, sent once after registration.
    #[serde(rename = "CONNECTED")]
    Connected {},

    /// The job was accepted and submitted to the backend.
    #[serde(rename = "STARTED")]
    Started { task_id: JobId, algorithm: String },

    /// The job reported a new progress value (0-100).
    #[serde(rename = "PROGRESS")]
    Progress { task_id: JobId, progress: u8 },

    /// Terminal: the job succeeded; carries the base64 result.
    #[serde(rename = "COMPLETED")]
    Completed { task_id: JobId, binarized_image: String },

    /// Terminal: the job failed; carries a human-readable reason.
    #[serde(rename = "FAILED")]
    Failed { task_id: JobId, error: String },
}

impl ServerMessage {
    /// The job this frame belongs to, if any.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            ServerMessage::Connected {} => None,
            ServerMessage::Started { task_id, .. }
            | ServerMessage::Progress { task_id, .. }
            | ServerMessage::Completed { task_id, .. }
            | ServerMessage::Failed { task_id, .. } => Some(task_id),
        }
    }

    /// Whether this frame is the last one ever sent for its job.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServerMessage::Completed { .. } | ServerMessage::Failed { .. }
        )
    }
}

/// Error frame for failures that happen before a job id exists
/// (malformed request, unsupported algorithm, backend submit failure).
///
/// The connection stays open after one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: String,
}

impl ErrorFrame {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
