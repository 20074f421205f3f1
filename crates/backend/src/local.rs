//! In-process job executor.
//!
//! Stands in for a remote job service when the gateway runs standalone:
//! each submission spawns a task that walks the progress ladder on a fixed
//! cadence, runs the binarization on a blocking thread, and records the
//! terminal status. Job state is persisted for the process lifetime so
//! polls stay idempotent after completion.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use graymill_core::types::JobId;
use tokio::sync::RwLock;

use crate::binarize::binarize;
use crate::client::{BackendError, JobBackend};
use crate::job::JobStatus;

/// Default delay between progress steps.
const DEFAULT_STEP_DELAY: Duration = Duration::from_secs(1);

/// Progress values reported while a job runs.
const PROGRESS_STEPS: [u8; 6] = [0, 20, 40, 60, 80, 100];

/// [`JobBackend`] that executes jobs inside the gateway process.
pub struct LocalJobBackend {
    jobs: Arc<RwLock<HashMap<JobId, JobStatus>>>,
    step_delay: Duration,
}

impl LocalJobBackend {
    /// Create an executor with the default step cadence.
    pub fn new() -> Self {
        Self::with_step_delay(DEFAULT_STEP_DELAY)
    }

    /// Create an executor with a custom delay between progress steps.
    /// Tests use short delays to keep polling loops fast.
    pub fn with_step_delay(step_delay: Duration) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            step_delay,
        }
    }

    /// Number of jobs the executor has ever accepted.
    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    async fn execute(
        jobs: Arc<RwLock<HashMap<JobId, JobStatus>>>,
        job_id: JobId,
        payload: String,
        algorithm: String,
        step_delay: Duration,
    ) {
        for progress in PROGRESS_STEPS {
            tokio::time::sleep(step_delay).await;
            jobs.write()
                .await
                .insert(job_id.clone(), JobStatus::running(progress));
        }

        // The thresholding pass is CPU-bound; keep it off the runtime.
        let outcome =
            tokio::task::spawn_blocking(move || binarize(&payload, &algorithm)).await;

        let status = match outcome {
            Ok(Ok(result)) => JobStatus::succeeded(result),
            Ok(Err(e)) => {
                tracing::warn!(job_id = %job_id, error = %e, "Local job failed");
                JobStatus::failed(e.to_string())
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Binarization task panicked");
                JobStatus::failed(format!("execution panicked: {e}"))
            }
        };

        jobs.write().await.insert(job_id, status);
    }
}

impl Default for LocalJobBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl JobBackend for LocalJobBackend {
    async fn submit(&self, payload: &str, algorithm: &str) -> Result<JobId, BackendError> {
        let job_id = uuid::Uuid::new_v4().to_string();
        self.jobs
            .write()
            .await
            .insert(job_id.clone(), JobStatus::pending());

        tracing::info!(job_id = %job_id, algorithm, "Local job accepted");

        tokio::spawn(Self::execute(
            Arc::clone(&self.jobs),
            job_id.clone(),
            payload.to_string(),
            algorithm.to_string(),
            self.step_delay,
        ));

        Ok(job_id)
    }

    async fn poll(&self, job_id: &str) -> Result<JobStatus, BackendError> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| BackendError::UnknownJob(job_id.to_string()))
    }
}
