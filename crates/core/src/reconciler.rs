//! Client-side state reconciler for the per-job ordering contract.
//!
//! Tracks the `Started -> Progress* -> Completed|Failed` state machine for
//! every job observed on a connection and classifies frames that violate it
//! as [`ProtocolAnomaly`]. An anomaly is never crash-worthy: callers log it
//! and discard the frame.

use std::collections::HashMap;

use crate::protocol::ServerMessage;
use crate::types::JobId;

/// Where a tracked job currently sits in its lifecycle, as seen by the
/// client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    /// `STARTED` received, no progress yet.
    Started,
    /// At least one `PROGRESS` received; carries the last accepted value.
    Running(u8),
    /// `COMPLETED` or `FAILED` received. Kept as a tombstone so late
    /// frames for this job are still detectable.
    Terminal,
}

/// A frame that violates the per-job ordering contract.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolAnomaly {
    /// A `STARTED` frame for a job that is already tracked.
    #[error("duplicate STARTED for job {0}")]
    DuplicateStart(JobId),

    /// A `PROGRESS` or terminal frame for a job never started.
    #[error("frame for unknown job {0}")]
    UnknownJob(JobId),

    /// A `PROGRESS` value below the last accepted one.
    #[error("progress went backwards for job {job_id}: {last} -> {received}")]
    ProgressRegression {
        job_id: JobId,
        last: u8,
        received: u8,
    },

    /// Any frame after the terminal frame for its job.
    #[error("frame after terminal state for job {0}")]
    AfterTerminal(JobId),
}

/// Per-connection reconciler mirroring the gateway's job state machines.
#[derive(Debug, Default)]
pub struct JobReconciler {
    jobs: HashMap<JobId, JobPhase>,
}

impl JobReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase of a job, if it has been observed.
    pub fn phase(&self, job_id: &str) -> Option<JobPhase> {
        self.jobs.get(job_id).copied()
    }

    /// Number of jobs still awaiting a terminal frame.
    pub fn active_jobs(&self) -> usize {
        self.jobs
            .values()
            .filter(|phase| **phase != JobPhase::Terminal)
            .count()
    }

    /// Apply one inbound frame to the tracked state.
    ///
    /// Returns the job's new phase on acceptance (`None` for
    /// connection-level frames that carry no job state). On violation the
    /// frame is rejected, the tracked state is left untouched, and the
    /// anomaly is logged at `warn`.
    pub fn apply(&mut self, msg: &ServerMessage) -> Result<Option<JobPhase>, ProtocolAnomaly> {
        let result = self.apply_inner(msg);
        if let Err(anomaly) = &result {
            tracing::warn!(anomaly = %anomaly, "Discarding out-of-contract frame");
        }
        result
    }

    fn apply_inner(&mut self, msg: &ServerMessage) -> Result<Option<JobPhase>, ProtocolAnomaly> {
        match msg {
            ServerMessage::Connected {} => Ok(None),

            ServerMessage::Started { task_id, .. } => {
                if self.jobs.contains_key(task_id) {
                    return Err(ProtocolAnomaly::DuplicateStart(task_id.clone()));
                }
                self.jobs.insert(task_id.clone(), JobPhase::Started);
                Ok(Some(JobPhase::Started))
            }

            ServerMessage::Progress { task_id, progress } => {
                match self.jobs.get(task_id) {
                    None => Err(ProtocolAnomaly::UnknownJob(task_id.clone())),
                    Some(JobPhase::Terminal) => {
                        Err(ProtocolAnomaly::AfterTerminal(task_id.clone()))
                    }
                    Some(JobPhase::Running(last)) if *progress < *last => {
                        Err(ProtocolAnomaly::ProgressRegression {
                            job_id: task_id.clone(),
                            last: *last,
                            received: *progress,
                        })
                    }
                    Some(JobPhase::Started) | Some(JobPhase::Running(_)) => {
                        let phase = JobPhase::Running(*progress);
                        self.jobs.insert(task_id.clone(), phase);
                        Ok(Some(phase))
                    }
                }
            }

            ServerMessage::Completed { task_id, .. } | ServerMessage::Failed { task_id, .. } => {
                match self.jobs.get(task_id) {
                    None => Err(ProtocolAnomaly::UnknownJob(task_id.clone())),
                    Some(JobPhase::Terminal) => {
                        Err(ProtocolAnomaly::AfterTerminal(task_id.clone()))
                    }
                    Some(_) => {
                        self.jobs.insert(task_id.clone(), JobPhase::Terminal);
                        Ok(Some(JobPhase::Terminal))
                    }
                }
            }
        }
    }
}
