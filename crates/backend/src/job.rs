//! Job lifecycle state as reported by a backend poll.

use serde::{Deserialize, Serialize};

/// Lifecycle state of one submitted job.
///
/// `Pending -> Running -> {Succeeded, Failed}`. `Running` may be observed
/// many times with non-decreasing progress; the terminal states are
/// observed at most once per poll sequence and never leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    /// Whether no further transitions follow this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// Snapshot of one job returned by [`JobBackend::poll`].
///
/// `progress` accompanies `Running`, `result` accompanies `Succeeded`,
/// `error` accompanies `Failed`; absent fields are omitted on the wire.
///
/// [`JobBackend::poll`]: crate::client::JobBackend::poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatus {
    pub fn pending() -> Self {
        Self {
            state: JobState::Pending,
            progress: None,
            result: None,
            error: None,
        }
    }

    pub fn running(progress: u8) -> Self {
        Self {
            state: JobState::Running,
            progress: Some(progress),
            result: None,
            error: None,
        }
    }

    pub fn succeeded(result: impl Into<String>) -> Self {
        Self {
            state: JobState::Succeeded,
            progress: Some(100),
            result: Some(result.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state: JobState::Failed,
            progress: None,
            result: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_serialize_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&JobState::Running).unwrap(),
            "\"RUNNING\""
        );
        assert_eq!(
            serde_json::to_string(&JobState::Succeeded).unwrap(),
            "\"SUCCEEDED\""
        );
    }

    #[test]
    fn terminal_states() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
    }

    #[test]
    fn absent_fields_are_omitted() {
        let json = serde_json::to_value(JobStatus::running(40)).unwrap();
        assert_eq!(json, serde_json::json!({"state":"RUNNING","progress":40}));
    }
}
