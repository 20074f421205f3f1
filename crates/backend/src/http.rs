//! HTTP client for a remote job service.
//!
//! Wraps the job service's REST surface (submission, polling) using
//! [`reqwest`]: `POST /jobs` to submit, `GET /jobs/{id}` to poll.

use graymill_core::types::JobId;
use serde::Deserialize;

use crate::client::{BackendError, JobBackend};
use crate::job::JobStatus;

/// HTTP-backed [`JobBackend`] for a single remote job service.
pub struct HttpJobBackend {
    client: reqwest::Client,
    base_url: String,
}

/// Response returned by the `POST /jobs` endpoint after queuing a job.
#[derive(Debug, Deserialize)]
struct SubmitResponse {
    /// Server-assigned identifier for the queued job.
    job_id: JobId,
}

impl HttpJobBackend {
    /// Create a new client for a job service.
    ///
    /// * `base_url` - Base HTTP URL, e.g. `http://host:9000`.
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create a client reusing an existing [`reqwest::Client`]
    /// (useful for connection pooling across services).
    pub fn with_client(client: reqwest::Client, base_url: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the response
    /// unchanged on success, or a [`BackendError::Api`] containing the
    /// status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(BackendError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, BackendError> {
        let response = Self::ensure_success(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))
    }
}

#[async_trait::async_trait]
impl JobBackend for HttpJobBackend {
    async fn submit(&self, payload: &str, algorithm: &str) -> Result<JobId, BackendError> {
        let body = serde_json::json!({
            "image": payload,
            "algorithm": algorithm,
        });

        let response = self
            .client
            .post(format!("{}/jobs", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        let submitted: SubmitResponse = Self::parse_response(response).await?;
        Ok(submitted.job_id)
    }

    async fn poll(&self, job_id: &str) -> Result<JobStatus, BackendError> {
        let response = self
            .client
            .get(format!("{}/jobs/{}", self.base_url, job_id))
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(BackendError::UnknownJob(job_id.to_string()));
        }

        Self::parse_response(response).await
    }
}
