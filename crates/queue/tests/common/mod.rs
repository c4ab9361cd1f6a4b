#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use kbingest_client::api::{ApiError, SubmissionError, SubmissionRequest};
use kbingest_client::backend::IngestBackend;
use kbingest_client::client::{FeedError, FeedStream};
use kbingest_client::messages::{BackendJob, FeedEvent};
use kbingest_core::files::LocalFile;
use kbingest_core::job::JobRecord;
use kbingest_core::types::RemoteJobId;
use kbingest_queue::config::QueueConfig;
use kbingest_queue::manager::QueueManager;
use tokio::sync::{mpsc, Notify};

/// How long any single test condition may take to become true.
pub const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// Queue configuration with a short polling interval.
pub fn test_config() -> QueueConfig {
    QueueConfig {
        poll_interval: Duration::from_millis(20),
        ..Default::default()
    }
}

pub fn manager(backend: &Arc<FakeBackend>) -> Arc<QueueManager> {
    let backend: Arc<dyn IngestBackend> = backend.clone();
    QueueManager::new(test_config(), backend)
}

/// `n` loose markdown files that pass every eligibility rule.
pub fn local_files(n: usize) -> Vec<LocalFile> {
    (0..n)
        .map(|i| LocalFile::new(format!("/data/docs/doc{i}.md"), 1024))
        .collect()
}

/// A backend job object as the ingestion service serializes it.
pub fn backend_job(
    remote_id: &str,
    status: &str,
    total: u32,
    successful: u32,
    failed: u32,
) -> BackendJob {
    serde_json::from_value(serde_json::json!({
        "job_id": remote_id,
        "status": status,
        "progress": {
            "total_files": total,
            "processed_files": successful + failed,
            "successful_files": successful,
            "failed_files": failed,
        },
        "file_list": (0..total).map(|i| format!("doc{i}.md")).collect::<Vec<_>>(),
    }))
    .expect("valid backend job")
}

pub fn progress_update(job: BackendJob) -> FeedEvent {
    FeedEvent::ProgressUpdate { data: job }
}

pub fn job_complete(job: BackendJob) -> FeedEvent {
    FeedEvent::JobComplete { data: job }
}

/// Poll `manager.jobs()` until `cond` holds or [`WAIT_LIMIT`] passes.
pub async fn wait_for<F>(manager: &QueueManager, mut cond: F) -> Vec<JobRecord>
where
    F: FnMut(&[JobRecord]) -> bool,
{
    let result = tokio::time::timeout(WAIT_LIMIT, async {
        loop {
            let jobs = manager.jobs().await;
            if cond(&jobs) {
                return jobs;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    result.expect("condition not reached in time")
}

/// Wait until the follower reading `feed` has dropped its end.
pub async fn wait_closed(feed: &mpsc::UnboundedSender<FeedEvent>) {
    tokio::time::timeout(WAIT_LIMIT, async {
        while !feed.is_closed() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("feed follower did not stop");
}

// ---------------------------------------------------------------------------
// Fake backend
// ---------------------------------------------------------------------------

/// Scripted live feed for one remote job.
pub enum FeedScript {
    /// The backend refuses the stream.
    Unavailable,
    /// Events are pushed by the test; dropping the sender closes the stream.
    Channel(mpsc::UnboundedReceiver<FeedEvent>),
}

#[derive(Default)]
struct FakeState {
    next_id: u32,
    submissions: Vec<SubmissionRequest>,
    submit_failures: VecDeque<String>,
    /// Holds the next submission open until notified.
    submit_gate: Option<Arc<Notify>>,
    feeds: HashMap<RemoteJobId, FeedScript>,
    /// Responses for `GET /jobs/{id}`; the last one repeats.
    polls: HashMap<RemoteJobId, VecDeque<BackendJob>>,
    poll_count: HashMap<RemoteJobId, usize>,
    listed: Vec<BackendJob>,
    cancelled: Vec<RemoteJobId>,
}

/// In-memory [`IngestBackend`]. Remote ids are `upload_1`, `upload_2`, ...
/// in submission order.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open a test-driven live feed for `remote_id`.
    pub fn feed_channel(&self, remote_id: &str) -> mpsc::UnboundedSender<FeedEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .lock()
            .unwrap()
            .feeds
            .insert(remote_id.to_string(), FeedScript::Channel(rx));
        tx
    }

    pub fn script_poll(&self, job: BackendJob) {
        self.state
            .lock()
            .unwrap()
            .polls
            .entry(job.job_id.clone())
            .or_default()
            .push_back(job);
    }

    pub fn fail_next_submission(&self, message: &str) {
        self.state
            .lock()
            .unwrap()
            .submit_failures
            .push_back(message.to_string());
    }

    /// Keep the next submission in flight until the returned handle is
    /// notified. The request is recorded before it blocks.
    pub fn hold_next_submission(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().unwrap().submit_gate = Some(Arc::clone(&gate));
        gate
    }

    pub fn set_listed(&self, jobs: Vec<BackendJob>) {
        self.state.lock().unwrap().listed = jobs;
    }

    pub fn submissions(&self) -> Vec<SubmissionRequest> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn cancelled(&self) -> Vec<RemoteJobId> {
        self.state.lock().unwrap().cancelled.clone()
    }

    /// A scripted live feed that nobody has opened yet.
    pub fn feed_unopened(&self, remote_id: &str) -> bool {
        self.state.lock().unwrap().feeds.contains_key(remote_id)
    }

    pub fn poll_count(&self, remote_id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .poll_count
            .get(remote_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl IngestBackend for FakeBackend {
    async fn submit(&self, request: SubmissionRequest) -> Result<RemoteJobId, SubmissionError> {
        let gate = {
            let mut state = self.state.lock().unwrap();
            state.submissions.push(request);
            state.submit_gate.take()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(body) = state.submit_failures.pop_front() {
            return Err(SubmissionError::Api(ApiError::ApiError { status: 500, body }));
        }
        state.next_id += 1;
        Ok(format!("upload_{}", state.next_id))
    }

    async fn list_jobs(&self) -> Result<Vec<BackendJob>, ApiError> {
        Ok(self.state.lock().unwrap().listed.clone())
    }

    async fn get_job(&self, remote_id: &str) -> Result<BackendJob, ApiError> {
        let mut state = self.state.lock().unwrap();
        *state.poll_count.entry(remote_id.to_string()).or_default() += 1;
        let Some(queue) = state.polls.get_mut(remote_id) else {
            return Err(ApiError::ApiError {
                status: 404,
                body: r#"{"detail":"Upload job not found"}"#.to_string(),
            });
        };
        let job = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        job.ok_or_else(|| ApiError::ApiError {
            status: 404,
            body: "{}".to_string(),
        })
    }

    async fn cancel_job(&self, remote_id: &str) -> Result<(), ApiError> {
        self.state.lock().unwrap().cancelled.push(remote_id.to_string());
        Ok(())
    }

    async fn open_feed(&self, remote_id: &str) -> Result<FeedStream, FeedError> {
        let script = self.state.lock().unwrap().feeds.remove(remote_id);
        match script {
            Some(FeedScript::Channel(rx)) => {
                let stream = futures::stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|event| (Ok(event), rx))
                });
                Ok(stream.boxed())
            }
            Some(FeedScript::Unavailable) | None => Err(FeedError::Unavailable(format!(
                "no live feed for {remote_id}"
            ))),
        }
    }
}
