//! The backend contract consumed by the gateway.

use graymill_core::types::JobId;

use crate::job::JobStatus;

/// Errors surfaced by a job backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backend could not be reached (network, DNS, TLS, timeouts).
    /// Transient from the gateway's point of view; the progress monitor
    /// retries these up to its configured bound.
    #[error("backend unreachable: {0}")]
    Unavailable(String),

    /// The backend answered with a non-2xx status code.
    #[error("backend API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The backend rejected the submission outright.
    #[error("submission rejected: {0}")]
    Rejected(String),

    /// Poll for a job id the backend has no record of.
    #[error("unknown job: {0}")]
    UnknownJob(JobId),
}

/// Asynchronous job-execution backend.
///
/// The gateway submits work and polls for state; the backend owns all
/// queuing and worker-pool machinery and persists job state independent
/// of the gateway process. `poll` is idempotent-safe to call repeatedly.
#[async_trait::async_trait]
pub trait JobBackend: Send + Sync {
    /// Submit a unit of work. Returns the backend-assigned job id.
    async fn submit(&self, payload: &str, algorithm: &str) -> Result<JobId, BackendError>;

    /// Fetch the current snapshot of a job.
    async fn poll(&self, job_id: &str) -> Result<JobStatus, BackendError>;
}
