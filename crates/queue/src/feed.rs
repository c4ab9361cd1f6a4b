//! Progress feed follower.
//!
//! One [`FeedFollower`] task runs per submitted job. It starts on the
//! live event stream and switches to fixed-interval polling of the job
//! status whenever the stream stops before the job is terminal.
//! The switch is one-directional: a job never goes back to streaming.
//!
//! Every backend report is handed to a [`ReportSink`] (the queue
//! manager), which merges it into the Job Record and says whether the
//! follower should keep going.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use kbingest_client::backend::IngestBackend;
use kbingest_client::client::FeedStream;
use kbingest_client::messages::FeedEvent;
use kbingest_core::job::RemoteSnapshot;
use kbingest_core::types::{JobId, RemoteJobId};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Feed mode
// ---------------------------------------------------------------------------

/// How a job's progress is currently being observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedMode {
    Streaming,
    Polling,
}

/// Why the live stream stopped being usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedFailure {
    /// The stream could not be opened.
    Unavailable(String),
    /// The stream broke or closed before a terminal event.
    Disconnected(String),
}

impl std::fmt::Display for FeedFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(reason) => write!(f, "live feed unavailable: {reason}"),
            Self::Disconnected(reason) => write!(f, "live feed disconnected: {reason}"),
        }
    }
}

impl FeedMode {
    /// The only transition. Any feed failure moves to `Polling`;
    /// `Polling` absorbs further failures.
    pub fn on_failure(self, _failure: &FeedFailure) -> FeedMode {
        match self {
            Self::Streaming | Self::Polling => Self::Polling,
        }
    }
}

// ---------------------------------------------------------------------------
// Report sink
// ---------------------------------------------------------------------------

/// One observation of a remote job, from either feed mode.
#[derive(Debug, Clone)]
pub enum FeedReport {
    /// Full job state (`job_status`, `progress_update`, `job_complete`, or a poll).
    Snapshot(RemoteSnapshot),
    /// A live-feed `error` event.
    Error {
        message: String,
        snapshot: Option<RemoteSnapshot>,
    },
    /// The backend no longer knows the job.
    Missing { reason: String },
}

/// What the follower should do after a report was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Continue,
    /// The job is terminal now.
    Finished,
    /// The job was removed or re-submitted; this follower is stale.
    Detached,
}

#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn apply_report(&self, job_id: JobId, remote_id: &str, report: FeedReport) -> Applied;

    async fn feed_mode_changed(&self, job_id: JobId, mode: FeedMode, failure: &FeedFailure);
}

impl FeedReport {
    pub fn from_event(event: &FeedEvent) -> Self {
        match event {
            FeedEvent::JobStatus { data }
            | FeedEvent::ProgressUpdate { data }
            | FeedEvent::JobComplete { data } => Self::Snapshot(data.to_snapshot()),
            FeedEvent::Error { message, data } => Self::Error {
                message: message
                    .clone()
                    .unwrap_or_else(|| "Unknown live feed error".to_string()),
                snapshot: data.as_ref().map(|d| d.to_snapshot()),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Follower
// ---------------------------------------------------------------------------

enum StreamEnd {
    /// Terminal report applied, or the sink detached us.
    Done,
    Cancelled,
    Failed(FeedFailure),
}

/// Observes one remote job until it is terminal or the follower is
/// cancelled.
pub struct FeedFollower<S: ReportSink + ?Sized> {
    pub job_id: JobId,
    pub remote_id: RemoteJobId,
    pub backend: Arc<dyn IngestBackend>,
    pub sink: Arc<S>,
    pub poll_interval: Duration,
    pub cancel: CancellationToken,
}

impl<S: ReportSink + ?Sized> FeedFollower<S> {
    pub async fn run(self) {
        let job_id = self.job_id;
        let remote_id = self.remote_id.as_str();
        tracing::debug!(%job_id, remote_id, "Following job progress");

        let opened = tokio::select! {
            _ = self.cancel.cancelled() => return,
            opened = self.backend.open_feed(remote_id) => opened,
        };

        let end = match opened {
            Ok(stream) => self.stream(stream).await,
            Err(e) => StreamEnd::Failed(FeedFailure::Unavailable(e.to_string())),
        };

        let failure = match end {
            StreamEnd::Done | StreamEnd::Cancelled => return,
            StreamEnd::Failed(failure) => failure,
        };

        let mode = FeedMode::Streaming.on_failure(&failure);
        tracing::info!(%job_id, remote_id, reason = %failure, "Falling back to polling");
        self.sink.feed_mode_changed(job_id, mode, &failure).await;

        self.poll().await;
        tracing::debug!(%job_id, remote_id, "Stopped following job");
    }

    async fn stream(&self, mut stream: FeedStream) -> StreamEnd {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return StreamEnd::Cancelled,
                next = stream.next() => next,
            };

            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    return StreamEnd::Failed(FeedFailure::Disconnected(e.to_string()))
                }
                None => {
                    return StreamEnd::Failed(FeedFailure::Disconnected(
                        "stream closed before a terminal event".to_string(),
                    ))
                }
            };

            tracing::trace!(job_id = %self.job_id, kind = event.kind(), "Feed event");
            let terminal = event.is_terminal();
            match self
                .sink
                .apply_report(self.job_id, &self.remote_id, FeedReport::from_event(&event))
                .await
            {
                Applied::Finished | Applied::Detached => return StreamEnd::Done,
                // A closing event that did not finish the job; polling settles it.
                Applied::Continue if terminal => {
                    return StreamEnd::Failed(FeedFailure::Disconnected(format!(
                        "{} event without a terminal job status",
                        event.kind()
                    )))
                }
                Applied::Continue => {}
            }
        }
    }

    async fn poll(&self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = self.backend.get_job(&self.remote_id) => result,
            };

            let report = match result {
                Ok(job) => FeedReport::Snapshot(job.to_snapshot()),
                Err(e) if e.is_not_found() => FeedReport::Missing {
                    reason: format!("Job {} no longer exists on the backend", self.remote_id),
                },
                Err(e) => {
                    tracing::warn!(
                        job_id = %self.job_id,
                        remote_id = %self.remote_id,
                        error = %e,
                        "Status poll failed, retrying",
                    );
                    continue;
                }
            };

            match self.sink.apply_report(self.job_id, &self.remote_id, report).await {
                Applied::Continue => {}
                Applied::Finished | Applied::Detached => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streaming_falls_back_to_polling() {
        let failure = FeedFailure::Disconnected("eof".into());
        assert_eq!(FeedMode::Streaming.on_failure(&failure), FeedMode::Polling);
    }

    #[test]
    fn polling_is_absorbing() {
        let failure = FeedFailure::Unavailable("404".into());
        assert_eq!(FeedMode::Polling.on_failure(&failure), FeedMode::Polling);
    }

    #[test]
    fn error_event_without_message() {
        let event: FeedEvent = serde_json::from_str(r#"{"type":"error"}"#).unwrap();
        match FeedReport::from_event(&event) {
            FeedReport::Error { message, snapshot } => {
                assert_eq!(message, "Unknown live feed error");
                assert!(snapshot.is_none());
            }
            other => panic!("Expected Error, got {other:?}"),
        }
    }
}
