//! Job dispatcher: validate, submit to the backend, start tracking.
//!
//! Each accepted request gets exactly one [`ProgressMonitor`]; the
//! dispatcher owns the master cancellation token that tears the monitors
//! down during shutdown.

use std::sync::Arc;

use graymill_backend::binarize::SUPPORTED_ALGORITHMS;
use graymill_backend::{BackendError, JobBackend};
use graymill_core::protocol::ServerMessage;
use graymill_core::types::JobId;
use tokio_util::sync::CancellationToken;

use crate::monitor::{MonitorConfig, ProgressMonitor};
use crate::ws::registry::ConnectionRegistry;

/// A validated-to-be job submission from one connection.
#[derive(Debug, Clone)]
pub struct SubmitJobRequest {
    /// Base64-encoded source image.
    pub image: String,
    /// Requested binarization algorithm.
    pub algorithm: String,
}

/// Why a submission was not accepted.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Bad request shape or unsupported algorithm. Surfaced synchronously
    /// to the caller; the connection stays open and no monitor starts.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The backend refused or could not take the submission.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The owning connection disappeared between the request and the
    /// `STARTED` emission. The job may still run in the backend; tracking
    /// is abandoned.
    #[error("connection is no longer live")]
    NotConnected,
}

/// Accepts job requests and spawns one progress monitor per accepted job.
pub struct JobDispatcher {
    registry: Arc<ConnectionRegistry>,
    backend: Arc<dyn JobBackend>,
    monitor: MonitorConfig,
    /// Master cancellation token; each monitor runs on a child token.
    cancel: CancellationToken,
}

impl JobDispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        backend: Arc<dyn JobBackend>,
        monitor: MonitorConfig,
    ) -> Self {
        Self {
            registry,
            backend,
            monitor,
            cancel: CancellationToken::new(),
        }
    }

    /// Validate a request, hand it to the backend, emit `STARTED`, and
    /// start exactly one progress monitor for the new job.
    pub async fn submit(
        &self,
        token: &str,
        request: SubmitJobRequest,
    ) -> Result<JobId, DispatchError> {
        Self::validate(&request)?;

        let job_id = self
            .backend
            .submit(&request.image, &request.algorithm)
            .await?;

        tracing::info!(
            token = %token,
            job_id = %job_id,
            algorithm = %request.algorithm,
            "Job submitted to backend",
        );

        // STARTED must precede any PROGRESS for this job, so it is emitted
        // here before the monitor exists.
        let started = ServerMessage::Started {
            task_id: job_id.clone(),
            algorithm: request.algorithm.clone(),
        };
        if self.registry.send(token, &started).await.is_err() {
            tracing::info!(
                token = %token,
                job_id = %job_id,
                "Connection gone before STARTED, abandoning tracking",
            );
            return Err(DispatchError::NotConnected);
        }

        self.registry.track_job(token, &job_id).await;

        let monitor = ProgressMonitor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.backend),
            self.monitor.clone(),
            job_id.clone(),
            token.to_string(),
            self.cancel.child_token(),
        );
        tokio::spawn(monitor.run());

        Ok(job_id)
    }

    /// Cancel every in-flight monitor. Called once during shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn validate(request: &SubmitJobRequest) -> Result<(), DispatchError> {
        if request.image.trim().is_empty() {
            return Err(DispatchError::Validation(
                "image payload is empty".to_string(),
            ));
        }
        if !SUPPORTED_ALGORITHMS
            .iter()
            .any(|a| a.eq_ignore_ascii_case(&request.algorithm))
        {
            return Err(DispatchError::Validation(format!(
                "unsupported algorithm: {}",
                request.algorithm
            )));
        }
        Ok(())
    }
}
