//! Progress monitor: one watcher task per active job.
//!
//! Polls the backend on a fixed interval, translates state transitions
//! into protocol frames, and terminates deterministically: every loop
//! branch either observes a terminal state, counts toward the bounded
//! retry limit, or detects a dead connection / cancelled token.

use std::sync::Arc;
use std::time::Duration;

use graymill_backend::{JobBackend, JobState};
use graymill_core::protocol::ServerMessage;
use graymill_core::types::{ConnectionToken, JobId};
use tokio_util::sync::CancellationToken;

use crate::ws::registry::ConnectionRegistry;

/// Tunable parameters for progress monitors.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Delay between backend polls.
    pub poll_interval: Duration,
    /// Consecutive poll failures tolerated before the job is reported
    /// failed with a backend-unavailable reason.
    pub max_poll_failures: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_poll_failures: 6,
        }
    }
}

/// Outcome of one poll tick.
enum Tick {
    Continue,
    Done,
}

/// Watches one job from submission to its terminal state.
///
/// All of the monitor's state (last emitted progress, retry counter) is
/// owned exclusively by its task; the registry is the only shared state
/// it touches.
pub struct ProgressMonitor {
    registry: Arc<ConnectionRegistry>,
    backend: Arc<dyn JobBackend>,
    config: MonitorConfig,
    job_id: JobId,
    token: ConnectionToken,
    cancel: CancellationToken,
    /// Last progress value actually delivered; duplicates and regressions
    /// below it are suppressed.
    last_progress: Option<u8>,
    /// Consecutive poll failures; reset on any successful poll.
    failures: u32,
}

impl ProgressMonitor {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        backend: Arc<dyn JobBackend>,
        config: MonitorConfig,
        job_id: JobId,
        token: ConnectionToken,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            backend,
            config,
            job_id,
            token,
            cancel,
            last_progress: None,
            failures: 0,
        }
    }

    /// Run the poll loop until the job terminates, the connection goes
    /// away, the retry bound trips, or the process shuts down.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        tracing::debug!(job_id = %self.job_id, token = %self.token, "Progress monitor started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!(job_id = %self.job_id, "Progress monitor cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    if matches!(self.tick().await, Tick::Done) {
                        break;
                    }
                }
            }
        }

        self.registry.untrack_job(&self.token, &self.job_id).await;
        tracing::debug!(job_id = %self.job_id, "Progress monitor stopped");
    }

    /// One poll cycle: liveness check, backend poll, emission.
    async fn tick(&mut self) -> Tick {
        if !self.registry.is_connected(&self.token).await {
            tracing::info!(
                job_id = %self.job_id,
                token = %self.token,
                "Connection gone, abandoning job tracking",
            );
            return Tick::Done;
        }

        let status = match self.backend.poll(&self.job_id).await {
            Ok(status) => {
                self.failures = 0;
                status
            }
            Err(e) => {
                self.failures += 1;
                tracing::warn!(
                    job_id = %self.job_id,
                    error = %e,
                    failures = self.failures,
                    "Backend poll failed",
                );
                if self.failures >= self.config.max_poll_failures {
                    self.emit(ServerMessage::Failed {
                        task_id: self.job_id.clone(),
                        error: format!("backend unavailable: {e}"),
                    })
                    .await;
                    return Tick::Done;
                }
                return Tick::Continue;
            }
        };

        match status.state {
            JobState::Pending => Tick::Continue,

            JobState::Running => {
                if let Some(progress) = status.progress {
                    let is_new = self.last_progress.is_none_or(|last| progress > last);
                    if is_new
                        && self
                            .emit(ServerMessage::Progress {
                                task_id: self.job_id.clone(),
                                progress,
                            })
                            .await
                    {
                        self.last_progress = Some(progress);
                    }
                }
                Tick::Continue
            }

            JobState::Succeeded => {
                self.emit(ServerMessage::Completed {
                    task_id: self.job_id.clone(),
                    binarized_image: status.result.unwrap_or_default(),
                })
                .await;
                Tick::Done
            }

            JobState::Failed => {
                self.emit(ServerMessage::Failed {
                    task_id: self.job_id.clone(),
                    error: status
                        .error
                        .unwrap_or_else(|| "unknown backend error".to_string()),
                })
                .await;
                Tick::Done
            }
        }
    }

    /// Best-effort delivery. A `NotConnected` result drops the frame
    /// without retrying it; the next tick's liveness check decides whether
    /// the monitor keeps running.
    async fn emit(&self, frame: ServerMessage) -> bool {
        match self.registry.send(&self.token, &frame).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(
                    job_id = %self.job_id,
                    error = %e,
                    "Dropped undeliverable frame",
                );
                false
            }
        }
    }
}
