//! End-to-end tests for the dispatcher + progress-monitor pipeline.
//!
//! A scripted backend replays a fixed sequence of poll results per job, so
//! every test observes a deterministic frame stream without a network or a
//! real executor.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use axum::extract::ws::Message;
use graymill_api::dispatcher::{DispatchError, JobDispatcher, SubmitJobRequest};
use graymill_api::monitor::MonitorConfig;
use graymill_api::ws::ConnectionRegistry;
use graymill_backend::{BackendError, JobBackend, JobStatus};
use graymill_core::protocol::ServerMessage;
use graymill_core::reconciler::JobReconciler;
use graymill_core::types::JobId;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

// ---------------------------------------------------------------------------
// Scripted backend
// ---------------------------------------------------------------------------

/// One scripted poll result.
#[derive(Debug, Clone)]
enum PollStep {
    Status(JobStatus),
    /// Simulated transport failure.
    Outage,
}

/// Backend that assigns each submission the next queued script and replays
/// it one step per poll. The final step repeats forever, so terminal
/// states (and permanent outages) are stable across polls.
struct ScriptedBackend {
    scripts: Mutex<VecDeque<Vec<PollStep>>>,
    assigned: Mutex<HashMap<JobId, VecDeque<PollStep>>>,
    submits: AtomicUsize,
    polls: AtomicUsize,
}

impl ScriptedBackend {
    fn new(scripts: Vec<Vec<PollStep>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            assigned: Mutex::new(HashMap::new()),
            submits: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
        })
    }

    fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl JobBackend for ScriptedBackend {
    async fn submit(&self, _payload: &str, _algorithm: &str) -> Result<JobId, BackendError> {
        let script = self
            .scripts
            .lock()
            .await
            .pop_front()
            .expect("more submissions than scripts");
        let n = self.submits.fetch_add(1, Ordering::SeqCst);
        let job_id = format!("job-{n}");
        self.assigned
            .lock()
            .await
            .insert(job_id.clone(), script.into_iter().collect());
        Ok(job_id)
    }

    async fn poll(&self, job_id: &str) -> Result<JobStatus, BackendError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let mut assigned = self.assigned.lock().await;
        let script = assigned
            .get_mut(job_id)
            .ok_or_else(|| BackendError::UnknownJob(job_id.to_string()))?;

        let step = if script.len() > 1 {
            script.pop_front().expect("script is non-empty")
        } else {
            script.front().cloned().expect("script is non-empty")
        };

        match step {
            PollStep::Status(status) => Ok(status),
            PollStep::Outage => Err(BackendError::Unavailable("simulated outage".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const TICK: Duration = Duration::from_millis(10);

fn test_config() -> MonitorConfig {
    MonitorConfig {
        poll_interval: TICK,
        max_poll_failures: 3,
    }
}

fn fixture(
    scripts: Vec<Vec<PollStep>>,
) -> (Arc<ConnectionRegistry>, Arc<ScriptedBackend>, JobDispatcher) {
    let registry = Arc::new(ConnectionRegistry::new());
    let backend = ScriptedBackend::new(scripts);
    let dispatcher = JobDispatcher::new(
        Arc::clone(&registry),
        Arc::clone(&backend) as Arc<dyn JobBackend>,
        test_config(),
    );
    (registry, backend, dispatcher)
}

fn request() -> SubmitJobRequest {
    SubmitJobRequest {
        image: "aGVsbG8=".into(),
        algorithm: "niblack".into(),
    }
}

/// Receive and parse the next protocol frame, failing the test on timeout.
async fn recv_frame(rx: &mut mpsc::UnboundedReceiver<Message>) -> ServerMessage {
    let msg = timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("channel closed while waiting for a frame");
    let Message::Text(text) = msg else {
        panic!("expected a text frame, got: {msg:?}");
    };
    serde_json::from_str(text.as_str()).expect("frame should parse as ServerMessage")
}

/// Assert that no further frame arrives within the given window.
async fn assert_silent(rx: &mut mpsc::UnboundedReceiver<Message>, window: Duration) {
    match timeout(window, rx.recv()).await {
        Err(_) => {}
        Ok(None) => {}
        Ok(Some(msg)) => panic!("unexpected frame after terminal: {msg:?}"),
    }
}

// ---------------------------------------------------------------------------
// Test: ordered stream with duplicate suppression
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ordered_stream_suppresses_duplicate_progress() {
    let (registry, _backend, dispatcher) = fixture(vec![vec![
        PollStep::Status(JobStatus::pending()),
        PollStep::Status(JobStatus::running(0)),
        PollStep::Status(JobStatus::running(20)),
        PollStep::Status(JobStatus::running(20)),
        PollStep::Status(JobStatus::running(40)),
        PollStep::Status(JobStatus::succeeded("cmVzdWx0")),
    ]]);
    let (_session, mut rx) = registry.register("tok".to_string()).await;

    let job_id = dispatcher.submit("tok", request()).await.unwrap();

    assert_eq!(
        recv_frame(&mut rx).await,
        ServerMessage::Started {
            task_id: job_id.clone(),
            algorithm: "niblack".into(),
        }
    );

    let mut progress = Vec::new();
    loop {
        match recv_frame(&mut rx).await {
            ServerMessage::Progress { task_id, progress: p } => {
                assert_eq!(task_id, job_id);
                progress.push(p);
            }
            ServerMessage::Completed {
                task_id,
                binarized_image,
            } => {
                assert_eq!(task_id, job_id);
                assert_eq!(binarized_image, "cmVzdWx0");
                break;
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    // The duplicate 20 is suppressed; completion is not a progress frame.
    assert_eq!(progress, vec![0, 20, 40]);

    // Nothing follows the terminal frame, and the job is untracked.
    assert_silent(&mut rx, TICK * 10).await;
    assert!(registry.owned_jobs("tok").await.is_empty());
}

// ---------------------------------------------------------------------------
// Test: unsupported algorithm is rejected before anything starts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unsupported_algorithm_starts_nothing() {
    let (registry, backend, dispatcher) = fixture(vec![]);
    let (_session, mut rx) = registry.register("tok".to_string()).await;

    let result = dispatcher
        .submit(
            "tok",
            SubmitJobRequest {
                image: "aGVsbG8=".into(),
                algorithm: "otsu".into(),
            },
        )
        .await;

    assert_matches!(result, Err(DispatchError::Validation(msg)) if msg.contains("otsu"));
    assert_eq!(backend.submit_count(), 0);
    assert_eq!(backend.poll_count(), 0);
    assert_silent(&mut rx, TICK * 5).await;
}

// ---------------------------------------------------------------------------
// Test: algorithm names match case-insensitively
// ---------------------------------------------------------------------------

#[tokio::test]
async fn algorithm_name_is_case_insensitive() {
    let (registry, _backend, dispatcher) =
        fixture(vec![vec![PollStep::Status(JobStatus::succeeded("b2s="))]]);
    let (_session, mut rx) = registry.register("tok".to_string()).await;

    dispatcher
        .submit(
            "tok",
            SubmitJobRequest {
                image: "aGVsbG8=".into(),
                algorithm: "Niblack".into(),
            },
        )
        .await
        .unwrap();

    assert_matches!(recv_frame(&mut rx).await, ServerMessage::Started { .. });
    assert_matches!(recv_frame(&mut rx).await, ServerMessage::Completed { .. });
}

// ---------------------------------------------------------------------------
// Test: empty payload is a validation error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_payload_is_rejected() {
    let (registry, backend, dispatcher) = fixture(vec![]);
    let (_session, _rx) = registry.register("tok".to_string()).await;

    let result = dispatcher
        .submit(
            "tok",
            SubmitJobRequest {
                image: "   ".into(),
                algorithm: "niblack".into(),
            },
        )
        .await;

    assert_matches!(result, Err(DispatchError::Validation(_)));
    assert_eq!(backend.submit_count(), 0);
}

// ---------------------------------------------------------------------------
// Test: closing the connection stops the monitor within one interval
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disconnect_stops_monitor() {
    // A job that would run for a very long time.
    let script: Vec<PollStep> = (0..=100)
        .map(|p| PollStep::Status(JobStatus::running(p)))
        .collect();
    let (registry, backend, dispatcher) = fixture(vec![script]);
    let (session, mut rx) = registry.register("tok".to_string()).await;

    dispatcher.submit("tok", request()).await.unwrap();
    assert_matches!(recv_frame(&mut rx).await, ServerMessage::Started { .. });
    assert_matches!(recv_frame(&mut rx).await, ServerMessage::Progress { .. });

    registry.deregister("tok", session).await;

    // Give the monitor a few intervals to notice, then confirm polling
    // has stopped entirely.
    tokio::time::sleep(TICK * 5).await;
    let polls_after_close = backend.poll_count();
    tokio::time::sleep(TICK * 5).await;
    assert_eq!(backend.poll_count(), polls_after_close);

    // The registry channel drains and closes without a terminal frame.
    while let Ok(Some(msg)) = timeout(Duration::from_millis(100), rx.recv()).await {
        let Message::Text(text) = msg else { continue };
        let frame: ServerMessage = serde_json::from_str(text.as_str()).unwrap();
        assert!(!frame.is_terminal(), "no terminal frame after disconnect");
    }
}

// ---------------------------------------------------------------------------
// Test: two concurrent jobs interleave with correct attribution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_jobs_produce_independent_streams() {
    let (registry, _backend, dispatcher) = fixture(vec![
        vec![
            PollStep::Status(JobStatus::running(10)),
            PollStep::Status(JobStatus::running(50)),
            PollStep::Status(JobStatus::succeeded("Zmlyc3Q=")),
        ],
        vec![
            PollStep::Status(JobStatus::running(5)),
            PollStep::Status(JobStatus::failed("ran out of pixels")),
        ],
    ]);
    let (_session, mut rx) = registry.register("tok".to_string()).await;

    let job_a = dispatcher.submit("tok", request()).await.unwrap();
    let job_b = dispatcher.submit("tok", request()).await.unwrap();
    assert_ne!(job_a, job_b);

    // Collect frames until both jobs have terminated. The reconciler is
    // the ordering contract's reference implementation: any misordered or
    // misattributed frame would surface as an anomaly here.
    let mut reconciler = JobReconciler::new();
    let mut by_job: HashMap<JobId, Vec<ServerMessage>> = HashMap::new();
    let mut terminals = 0;
    while terminals < 2 {
        let frame = recv_frame(&mut rx).await;
        reconciler
            .apply(&frame)
            .expect("stream must satisfy the ordering contract");
        if frame.is_terminal() {
            terminals += 1;
        }
        let task_id = frame.task_id().expect("job frames carry a task id");
        by_job.entry(task_id.to_string()).or_default().push(frame);
    }

    let stream_a = &by_job[&job_a];
    assert_matches!(stream_a.first(), Some(ServerMessage::Started { .. }));
    assert_matches!(
        stream_a.last(),
        Some(ServerMessage::Completed { binarized_image, .. }) if binarized_image == "Zmlyc3Q="
    );

    let stream_b = &by_job[&job_b];
    assert_matches!(stream_b.first(), Some(ServerMessage::Started { .. }));
    assert_matches!(
        stream_b.last(),
        Some(ServerMessage::Failed { error, .. }) if error == "ran out of pixels"
    );

    assert_silent(&mut rx, TICK * 10).await;
}

// ---------------------------------------------------------------------------
// Test: a dead backend trips the retry bound, not an infinite poll
// ---------------------------------------------------------------------------

#[tokio::test]
async fn permanently_unavailable_backend_fails_the_job() {
    let (registry, backend, dispatcher) = fixture(vec![vec![PollStep::Outage]]);
    let (_session, mut rx) = registry.register("tok".to_string()).await;

    let job_id = dispatcher.submit("tok", request()).await.unwrap();

    assert_matches!(recv_frame(&mut rx).await, ServerMessage::Started { .. });

    let frame = recv_frame(&mut rx).await;
    assert_matches!(
        &frame,
        ServerMessage::Failed { task_id, error }
            if *task_id == job_id && error.contains("backend unavailable")
    );

    // Exactly max_poll_failures polls were made; the monitor is gone.
    assert_eq!(backend.poll_count(), test_config().max_poll_failures as usize);
    assert_silent(&mut rx, TICK * 10).await;
}

// ---------------------------------------------------------------------------
// Test: a transient outage below the bound is survived
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transient_outage_is_retried() {
    let (registry, _backend, dispatcher) = fixture(vec![vec![
        PollStep::Outage,
        PollStep::Outage,
        PollStep::Status(JobStatus::running(50)),
        PollStep::Outage,
        PollStep::Status(JobStatus::succeeded("b2s=")),
    ]]);
    let (_session, mut rx) = registry.register("tok".to_string()).await;

    let job_id = dispatcher.submit("tok", request()).await.unwrap();

    assert_matches!(recv_frame(&mut rx).await, ServerMessage::Started { .. });
    assert_eq!(
        recv_frame(&mut rx).await,
        ServerMessage::Progress {
            task_id: job_id.clone(),
            progress: 50,
        }
    );
    assert_matches!(recv_frame(&mut rx).await, ServerMessage::Completed { .. });
}

// ---------------------------------------------------------------------------
// Test: dispatcher shutdown cancels in-flight monitors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_cancels_monitors() {
    let script: Vec<PollStep> = (0..=100)
        .map(|p| PollStep::Status(JobStatus::running(p)))
        .collect();
    let (registry, backend, dispatcher) = fixture(vec![script]);
    let (_session, mut rx) = registry.register("tok".to_string()).await;

    dispatcher.submit("tok", request()).await.unwrap();
    assert_matches!(recv_frame(&mut rx).await, ServerMessage::Started { .. });

    dispatcher.shutdown();

    tokio::time::sleep(TICK * 5).await;
    let polls_after_shutdown = backend.poll_count();
    tokio::time::sleep(TICK * 5).await;
    assert_eq!(backend.poll_count(), polls_after_shutdown);
}
