//! Console client for the Graymill gateway.
//!
//! Connects over WebSocket, submits one binarization job from a base64
//! file, and streams lifecycle frames through the [`JobReconciler`] until
//! the job reaches a terminal state. Frames that violate the ordering
//! contract are logged and discarded, never fatal.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use graymill_core::protocol::{ClientMessage, ErrorFrame, ServerMessage};
use graymill_core::reconciler::{JobPhase, JobReconciler};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, thiserror::Error)]
enum ClientError {
    #[error("failed to read image file {path}: {source}")]
    ReadImage {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("image file {0} is empty")]
    EmptyImage(PathBuf),

    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("connection error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connection closed before the job finished")]
    ClosedEarly,

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("gateway rejected the request: {0}")]
    Rejected(String),

    #[error("job failed: {0}")]
    JobFailed(String),

    #[error("result is not valid base64: {0}")]
    InvalidResult(base64::DecodeError),

    #[error("failed to write result to {path}: {source}")]
    WriteResult {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "graymill_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let (url, token, image_path, algorithm) = match args.as_slice() {
        [_, url, token, image] => (url.clone(), token.clone(), image.clone(), None),
        [_, url, token, image, algorithm] => {
            (url.clone(), token.clone(), image.clone(), Some(algorithm.clone()))
        }
        _ => {
            eprintln!("Usage: graymill-client <ws-url> <token> <image-base64-file> [algorithm]");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(&url, &token, Path::new(&image_path), algorithm.as_deref()).await {
        tracing::error!(error = %e, "Client failed");
        std::process::exit(1);
    }
}

async fn run(
    url: &str,
    token: &str,
    image_path: &Path,
    algorithm: Option<&str>,
) -> Result<(), ClientError> {
    let image = load_image_base64(image_path)?;
    let algorithm = algorithm
        .unwrap_or(graymill_core::protocol::DEFAULT_ALGORITHM)
        .to_string();

    let handshake_url = format!("{url}?token={token}");
    let (ws_stream, _response) =
        connect_async(&handshake_url)
            .await
            .map_err(|e| ClientError::Connect {
                url: url.to_string(),
                source: e,
            })?;
    tracing::info!(url, "Connected to gateway");

    let (mut sink, mut stream) = ws_stream.split();

    let request = ClientMessage::BinarizeImage {
        image,
        algorithm: algorithm.clone(),
    };
    let payload = serde_json::to_string(&request)?;
    sink.send(Message::Text(payload.into())).await?;
    tracing::info!(algorithm, "Job request sent");

    let mut reconciler = JobReconciler::new();
    let mut job_id: Option<String> = None;

    while let Some(frame) = stream.next().await {
        match frame? {
            Message::Text(text) => {
                if let Some(result) =
                    handle_frame(text.as_ref(), &mut reconciler, &mut job_id)?
                {
                    let output = save_result(image_path, &result)?;
                    tracing::info!(output = %output.display(), "Result saved");
                    return Ok(());
                }
            }
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => break,
            other => {
                tracing::debug!(frame = ?other, "Ignoring non-text frame");
            }
        }
    }

    Err(ClientError::ClosedEarly)
}

/// Process one text frame. Returns the result payload once the submitted
/// job completes.
fn handle_frame(
    text: &str,
    reconciler: &mut JobReconciler,
    job_id: &mut Option<String>,
) -> Result<Option<String>, ClientError> {
    let msg = match serde_json::from_str::<ServerMessage>(text) {
        Ok(msg) => msg,
        Err(_) => {
            // Pre-job failures arrive as a bare error frame.
            if let Ok(err) = serde_json::from_str::<ErrorFrame>(text) {
                return Err(ClientError::Rejected(err.error));
            }
            tracing::warn!(frame = text, "Unrecognized frame, discarding");
            return Ok(None);
        }
    };

    // Out-of-contract frames are logged by the reconciler and dropped.
    if reconciler.apply(&msg).is_err() {
        return Ok(None);
    }

    match msg {
        ServerMessage::Connected {} => {
            tracing::info!("Handshake acknowledged");
            Ok(None)
        }
        ServerMessage::Started { task_id, algorithm } => {
            tracing::info!(task_id = %task_id, algorithm = %algorithm, "Job started");
            *job_id = Some(task_id);
            Ok(None)
        }
        ServerMessage::Progress { task_id, progress } => {
            tracing::info!(task_id = %task_id, progress, "Progress");
            Ok(None)
        }
        ServerMessage::Completed {
            task_id,
            binarized_image,
        } => {
            tracing::info!(task_id = %task_id, "Job completed");
            debug_assert_eq!(reconciler.phase(&task_id), Some(JobPhase::Terminal));
            Ok(Some(binarized_image))
        }
        ServerMessage::Failed { task_id, error } => {
            tracing::error!(task_id = %task_id, error = %error, "Job failed");
            Err(ClientError::JobFailed(error))
        }
    }
}

/// Read the base64 payload from disk, trimming whitespace and repairing
/// missing padding the way the gateway expects it.
fn load_image_base64(path: &Path) -> Result<String, ClientError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ClientError::ReadImage {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut payload: String = raw.split_whitespace().collect();
    if payload.is_empty() {
        return Err(ClientError::EmptyImage(path.to_path_buf()));
    }
    let missing = (4 - payload.len() % 4) % 4;
    payload.extend(std::iter::repeat('=').take(missing));
    Ok(payload)
}

/// Decode the base64 result and write it next to the input file.
fn save_result(image_path: &Path, result_b64: &str) -> Result<PathBuf, ClientError> {
    let output = image_path.with_extension("binarized.png");
    let bytes = BASE64
        .decode(result_b64.as_bytes())
        .map_err(ClientError::InvalidResult)?;
    std::fs::write(&output, bytes).map_err(|e| ClientError::WriteResult {
        path: output.clone(),
        source: e,
    })?;
    Ok(output)
}
