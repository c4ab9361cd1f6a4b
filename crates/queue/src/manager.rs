//! Upload queue manager.
//!
//! [`QueueManager`] owns the ordered list of Job Records and drives them
//! through the backend one at a time: pick the oldest `queued` job,
//! submit it, attach a [`FeedFollower`], wait until the job is terminal,
//! repeat. Enqueuing never starts work; only [`QueueManager::resume_processing`]
//! does.
//!
//! All record mutations happen under a single lock. Backend calls are
//! made without holding it, and their results are re-checked against the
//! current state when they come back (a job may have been removed or
//! cancelled in the meantime).
//!
//! Queue events are broadcast via a [`tokio::sync::broadcast`] channel.
//! Call [`QueueManager::subscribe`] to receive them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use kbingest_client::api::{ApiError, SubmissionRequest};
use kbingest_client::backend::IngestBackend;
use kbingest_core::error::CoreError;
use kbingest_core::files::{select_files, IngestMode, LocalFile, SkippedFile};
use kbingest_core::job::{JobRecord, JobSettings, JobStatus, MergeOutcome};
use kbingest_core::types::{JobId, RemoteJobId};
use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::QueueConfig;
use crate::events::QueueEvent;
use crate::feed::{Applied, FeedFailure, FeedFollower, FeedMode, FeedReport, ReportSink};
use crate::reconciler::Reconciler;

/// Broadcast channel capacity for queue events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Errors returned by queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Job {0} not found")]
    NotFound(JobId),

    #[error("Job {job_id} is {status}: {reason}")]
    InvalidState {
        job_id: JobId,
        status: JobStatus,
        reason: &'static str,
    },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Backend request failed: {0}")]
    Backend(#[from] ApiError),
}

/// Whether the processing loop should pick up queued jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Idle,
    Running,
}

/// Job counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub total: usize,
    pub queued: usize,
    pub processing: usize,
    pub paused: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Bookkeeping for one running feed follower.
struct FeedAttachment {
    remote_id: RemoteJobId,
    mode: FeedMode,
    /// Child of the manager's master token.
    cancel: CancellationToken,
}

#[derive(Default)]
struct QueueState {
    /// Insertion order.
    jobs: Vec<JobRecord>,
    run_state: RunState,
    /// A processing loop task exists.
    loop_active: bool,
    /// The job the loop is currently driving.
    current: Option<JobId>,
    feeds: HashMap<JobId, FeedAttachment>,
}

impl QueueState {
    fn job_mut(&mut self, job_id: JobId) -> Option<&mut JobRecord> {
        self.jobs.iter_mut().find(|j| j.id == job_id)
    }

    fn detach(&mut self, job_id: JobId) {
        if let Some(feed) = self.feeds.remove(&job_id) {
            feed.cancel.cancel();
            tracing::debug!(%job_id, remote_id = %feed.remote_id, "Feed detached");
        }
    }

    /// Forget the loop's current job once it is terminal or gone.
    fn release_current(&mut self) {
        if let Some(current) = self.current {
            let done = self
                .jobs
                .iter()
                .find(|j| j.id == current)
                .map_or(true, |j| j.is_terminal());
            if done {
                self.current = None;
            }
        }
    }
}

enum LoopStep {
    Submit {
        job_id: JobId,
        request: SubmissionRequest,
    },
    Wait,
    Stop,
}

/// Owns the upload queue.
///
/// Created via [`QueueManager::new`]; the returned `Arc` can be cloned
/// freely into UI handlers and background tasks.
pub struct QueueManager {
    state: Mutex<QueueState>,
    backend: Arc<dyn IngestBackend>,
    config: QueueConfig,
    event_tx: broadcast::Sender<QueueEvent>,
    /// Bumped after every state change; the loop and waiters watch it.
    revision: watch::Sender<u64>,
    /// Master cancellation token, cancelled on shutdown.
    cancel: CancellationToken,
}

impl QueueManager {
    pub fn new(config: QueueConfig, backend: Arc<dyn IngestBackend>) -> Arc<Self> {
        if config.concurrent_jobs > 1 {
            tracing::warn!(
                concurrent_jobs = config.concurrent_jobs,
                "Concurrent job processing is not supported; jobs run one at a time",
            );
        }
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (revision, _) = watch::channel(0);

        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            backend,
            config,
            event_tx,
            revision,
            cancel: CancellationToken::new(),
        })
    }

    /// Subscribe to queue events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.event_tx.subscribe()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    // ---- read access ----

    /// Snapshot of every job, in queue order.
    pub async fn jobs(&self) -> Vec<JobRecord> {
        self.state.lock().await.jobs.clone()
    }

    pub async fn get(&self, job_id: JobId) -> Option<JobRecord> {
        self.state
            .lock()
            .await
            .jobs
            .iter()
            .find(|j| j.id == job_id)
            .cloned()
    }

    pub async fn run_state(&self) -> RunState {
        self.state.lock().await.run_state
    }

    /// Current feed mode of a job that is being observed.
    pub async fn feed_mode(&self, job_id: JobId) -> Option<FeedMode> {
        self.state.lock().await.feeds.get(&job_id).map(|f| f.mode)
    }

    pub async fn summary(&self) -> QueueSummary {
        let state = self.state.lock().await;
        let mut summary = QueueSummary {
            total: state.jobs.len(),
            ..Default::default()
        };
        for job in &state.jobs {
            match job.status {
                JobStatus::Queued => summary.queued += 1,
                JobStatus::Processing => summary.processing += 1,
                JobStatus::Paused => summary.paused += 1,
                JobStatus::Completed => summary.completed += 1,
                JobStatus::Failed => summary.failed += 1,
                JobStatus::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }

    /// Wait until no job is processing and the loop has exited. Jobs left
    /// `queued` or `paused` while the queue is idle do not hold this up.
    pub async fn wait_until_settled(&self) {
        let mut rx = self.revision.subscribe();
        loop {
            rx.borrow_and_update();
            {
                let state = self.state.lock().await;
                let processing = state.jobs.iter().any(|j| j.status == JobStatus::Processing);
                if !state.loop_active && !processing {
                    return;
                }
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    // ---- enqueueing ----

    /// Append one job built from `files`.
    ///
    /// Files failing the eligibility rules are recorded as skipped. The
    /// selection must not be empty after filtering and must fit into one
    /// batch. Never starts processing.
    pub async fn add_to_queue(
        &self,
        mode: IngestMode,
        files: Vec<LocalFile>,
        settings: JobSettings,
    ) -> Result<JobId, QueueError> {
        settings.validate()?;
        let selection = select_files(files, &settings, mode);
        check_batch(mode, &selection.accepted, &settings)?;
        Ok(self.push_job(mode, selection.accepted, selection.skipped, settings).await)
    }

    /// Split a large selection into consecutive jobs of at most
    /// `batch_size` files. Archives each become their own job. Skipped
    /// files are recorded on the first job.
    pub async fn enqueue_batches(
        &self,
        mode: IngestMode,
        files: Vec<LocalFile>,
        settings: JobSettings,
    ) -> Result<Vec<JobId>, QueueError> {
        settings.validate()?;
        let selection = select_files(files, &settings, mode);
        if selection.accepted.is_empty() {
            return Err(no_eligible_files(&selection.skipped).into());
        }

        let chunk = match mode {
            IngestMode::Archive => 1,
            IngestMode::Files | IngestMode::Directory => settings.batch_size,
        };
        let mut skipped = Some(selection.skipped);
        let mut ids = Vec::new();
        for batch in selection.accepted.chunks(chunk) {
            let skipped = skipped.take().unwrap_or_default();
            let id = self
                .push_job(mode, batch.to_vec(), skipped, settings.clone())
                .await;
            ids.push(id);
        }
        tracing::info!(jobs = ids.len(), mode = mode.upload_type(), "Selection split into batches");
        Ok(ids)
    }

    async fn push_job(
        &self,
        mode: IngestMode,
        files: Vec<LocalFile>,
        skipped: Vec<SkippedFile>,
        settings: JobSettings,
    ) -> JobId {
        let record = JobRecord::new(mode, files, skipped, settings, Utc::now());
        let job_id = record.id;
        let file_count = record.files.len();
        let skipped = record.skipped.len();

        self.state.lock().await.jobs.push(record);
        tracing::info!(%job_id, file_count, skipped, mode = mode.upload_type(), "Job queued");
        self.emit(QueueEvent::JobAdded {
            job_id,
            file_count,
            skipped,
        });
        self.bump();
        job_id
    }

    // ---- queue controls ----

    /// Start (or keep) processing. Paused jobs are queued again.
    ///
    /// Returns whether a new processing loop was spawned; calling this
    /// while a loop is already running does not start a second one.
    pub async fn resume_processing(self: &Arc<Self>) -> bool {
        let spawn = {
            let mut state = self.state.lock().await;
            for job in &mut state.jobs {
                job.unpause();
            }
            let was_running = state.run_state == RunState::Running;
            state.run_state = RunState::Running;
            if !was_running {
                self.emit(QueueEvent::RunStateChanged { running: true });
            }
            let spawn = !state.loop_active;
            state.loop_active = true;
            spawn
        };
        self.bump();

        if spawn {
            self.spawn_loop();
        }
        spawn
    }

    /// Stop picking up new jobs. The job currently being processed runs
    /// to completion; queued jobs become `paused`.
    pub async fn pause_processing(&self) {
        {
            let mut state = self.state.lock().await;
            let paused = state
                .jobs
                .iter_mut()
                .map(|j| j.pause())
                .filter(|p| *p)
                .count();
            if state.run_state == RunState::Running {
                self.emit(QueueEvent::RunStateChanged { running: false });
            }
            state.run_state = RunState::Idle;
            tracing::info!(paused, "Queue paused");
        }
        self.bump();
    }

    /// Put a failed job back in the queue. Any other status is left
    /// untouched and `Ok(false)` is returned.
    pub async fn retry_item(&self, job_id: JobId) -> Result<bool, QueueError> {
        let retried = {
            let mut state = self.state.lock().await;
            let job = state.job_mut(job_id).ok_or(QueueError::NotFound(job_id))?;
            job.retry(Utc::now())
        };
        if retried {
            tracing::info!(%job_id, "Job queued for retry");
            self.emit(QueueEvent::JobRetried { job_id });
            self.bump();
        }
        Ok(retried)
    }

    /// Remove a terminal job.
    pub async fn remove_from_queue(&self, job_id: JobId) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock().await;
            let index = state
                .jobs
                .iter()
                .position(|j| j.id == job_id)
                .ok_or(QueueError::NotFound(job_id))?;
            let status = state.jobs[index].status;
            if !status.is_terminal() {
                return Err(QueueError::InvalidState {
                    job_id,
                    status,
                    reason: "only finished jobs can be removed",
                });
            }
            state.detach(job_id);
            state.jobs.remove(index);
        }
        self.emit(QueueEvent::JobRemoved { job_id });
        self.bump();
        Ok(())
    }

    /// Remove every completed job. Returns how many were removed.
    pub async fn clear_completed(&self) -> usize {
        let removed: Vec<JobId> = {
            let mut state = self.state.lock().await;
            let (done, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut state.jobs)
                .into_iter()
                .partition(|j| j.status == JobStatus::Completed);
            state.jobs = keep;
            done.into_iter().map(|j| j.id).collect()
        };
        for job_id in &removed {
            self.emit(QueueEvent::JobRemoved { job_id: *job_id });
        }
        self.bump();
        removed.len()
    }

    /// Detach every feed and empty the queue.
    ///
    /// A submission already on the wire is not aborted; its response is
    /// discarded when it arrives.
    pub async fn clear_all(&self) -> usize {
        let removed: Vec<JobId> = {
            let mut state = self.state.lock().await;
            let ids: Vec<JobId> = state.feeds.keys().copied().collect();
            for job_id in ids {
                state.detach(job_id);
            }
            state.current = None;
            std::mem::take(&mut state.jobs).into_iter().map(|j| j.id).collect()
        };
        tracing::info!(removed = removed.len(), "Queue cleared");
        for job_id in &removed {
            self.emit(QueueEvent::JobRemoved { job_id: *job_id });
        }
        self.bump();
        removed.len()
    }

    /// Cancel a job that has not finished.
    ///
    /// Queued and paused jobs are cancelled locally. A submitted job is
    /// detached, marked cancelled, and cancelled on the backend; the local
    /// status stays `cancelled` even if that request fails.
    pub async fn cancel_job(&self, job_id: JobId) -> Result<(), QueueError> {
        let remote_id = {
            let mut state = self.state.lock().await;
            let job = state.job_mut(job_id).ok_or(QueueError::NotFound(job_id))?;
            if job.is_terminal() {
                return Err(QueueError::InvalidState {
                    job_id,
                    status: job.status,
                    reason: "job already finished",
                });
            }
            job.cancel(Utc::now())?;
            let remote_id = job.remote_id.clone();
            state.detach(job_id);
            state.release_current();
            remote_id
        };
        tracing::info!(%job_id, remote_id = remote_id.as_deref().unwrap_or(""), "Job cancelled");
        self.emit(QueueEvent::JobFinished {
            job_id,
            status: JobStatus::Cancelled,
        });
        self.bump();

        if let Some(remote_id) = remote_id {
            self.backend.cancel_job(&remote_id).await?;
        }
        Ok(())
    }

    // ---- startup and shutdown ----

    /// Adopt jobs already running on the backend and follow them.
    /// Jobs already tracked by remote id are skipped. Returns how many
    /// were adopted.
    pub async fn reconcile_on_startup(self: &Arc<Self>) -> Result<usize, QueueError> {
        let reconciler = Reconciler::new(Arc::clone(&self.backend), self.config.default_settings());
        let records = reconciler.reconcile().await?;

        let mut adopted = Vec::new();
        {
            let mut state = self.state.lock().await;
            for record in records {
                let Some(remote_id) = record.remote_id.clone() else {
                    continue;
                };
                let known = state
                    .jobs
                    .iter()
                    .any(|j| j.remote_id.as_deref() == Some(remote_id.as_str()));
                if known {
                    continue;
                }
                let job_id = record.id;
                adopted.push((job_id, record.files.len()));
                state.jobs.push(record);
                self.attach_feed(&mut state, job_id, remote_id);
            }
        }

        for (job_id, file_count) in &adopted {
            self.emit(QueueEvent::JobAdded {
                job_id: *job_id,
                file_count: *file_count,
                skipped: 0,
            });
        }
        self.bump();
        Ok(adopted.len())
    }

    /// Stop the loop and every feed follower.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down upload queue");
        self.cancel.cancel();
        let mut state = self.state.lock().await;
        state.feeds.clear();
        state.run_state = RunState::Idle;
        drop(state);
        self.bump();
    }

    // ---- processing loop ----

    fn spawn_loop(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tracing::info!("Processing loop started");
            manager.run_loop().await;
            tracing::info!("Processing loop exited");
        });

        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Processing loop halted");
                supervisor.loop_halted(e.to_string()).await;
            }
        });
    }

    async fn run_loop(self: Arc<Self>) {
        let mut rx = self.revision.subscribe();
        loop {
            rx.borrow_and_update();
            match self.next_step().await {
                LoopStep::Stop => return,
                LoopStep::Submit { job_id, request } => self.submit(job_id, request).await,
                LoopStep::Wait => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            self.state.lock().await.loop_active = false;
                            return;
                        }
                        changed = rx.changed() => {
                            if changed.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Decide what the loop does next, starting the next job if one is due.
    async fn next_step(&self) -> LoopStep {
        let mut state = self.state.lock().await;
        state.release_current();

        if self.cancel.is_cancelled() {
            state.loop_active = false;
            return LoopStep::Stop;
        }
        if state.current.is_some() {
            return LoopStep::Wait;
        }
        if state.run_state != RunState::Running {
            state.loop_active = false;
            self.bump();
            return LoopStep::Stop;
        }
        // Jobs adopted at startup hold the single processing slot too.
        if state.jobs.iter().any(|j| j.status == JobStatus::Processing) {
            return LoopStep::Wait;
        }

        let next = state
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Queued)
            .min_by_key(|j| j.timestamps.queued_at)
            .map(|j| j.id);

        let Some(job_id) = next else {
            state.run_state = RunState::Idle;
            state.loop_active = false;
            self.emit(QueueEvent::RunStateChanged { running: false });
            tracing::info!("Queue drained, going idle");
            self.bump();
            return LoopStep::Stop;
        };

        let Some(job) = state.job_mut(job_id) else {
            return LoopStep::Wait;
        };
        if let Err(e) = job.start(Utc::now()) {
            tracing::error!(%job_id, error = %e, "Failed to start job");
            return LoopStep::Wait;
        }
        let request =
            SubmissionRequest::new(job.mode, job.submission_files(), job.settings.clone());
        state.current = Some(job_id);
        drop(state);

        tracing::info!(%job_id, "Job started");
        self.emit(QueueEvent::JobStarted { job_id });
        self.bump();

        match request {
            Ok(request) => LoopStep::Submit { job_id, request },
            Err(e) => {
                self.finish_with_error(job_id, format!("Submission failed: {e}")).await;
                LoopStep::Wait
            }
        }
    }

    /// Upload the job, then hand it to a feed follower.
    async fn submit(self: &Arc<Self>, job_id: JobId, request: SubmissionRequest) {
        let result = tokio::select! {
            _ = self.cancel.cancelled() => return,
            result = self.backend.submit(request) => result,
        };

        let remote_id = match result {
            Ok(remote_id) => remote_id,
            Err(e) => {
                tracing::warn!(%job_id, error = %e, "Submission failed");
                self.finish_with_error(job_id, format!("Submission failed: {e}")).await;
                return;
            }
        };

        let mut state = self.state.lock().await;
        let Some(job) = state.job_mut(job_id) else {
            tracing::info!(
                %job_id,
                %remote_id,
                "Job removed during submission, discarding response",
            );
            return;
        };
        if job.status != JobStatus::Processing {
            let status = job.status;
            drop(state);
            tracing::info!(
                %job_id,
                %remote_id,
                %status,
                "Job finished during submission, cancelling backend job",
            );
            if let Err(e) = self.backend.cancel_job(&remote_id).await {
                tracing::warn!(
                    %job_id,
                    %remote_id,
                    error = %e,
                    "Failed to cancel orphaned backend job",
                );
            }
            return;
        }
        if let Err(e) = job.mark_submitted(remote_id.clone()) {
            tracing::error!(%job_id, error = %e, "Failed to record submission");
            return;
        }

        self.attach_feed(&mut state, job_id, remote_id.clone());
        drop(state);

        tracing::info!(%job_id, %remote_id, "Job submitted");
        self.emit(QueueEvent::JobSubmitted { job_id, remote_id });
        self.bump();
    }

    fn attach_feed(
        self: &Arc<Self>,
        state: &mut QueueState,
        job_id: JobId,
        remote_id: RemoteJobId,
    ) {
        let cancel = self.cancel.child_token();
        let follower = FeedFollower {
            job_id,
            remote_id: remote_id.clone(),
            backend: Arc::clone(&self.backend),
            sink: Arc::clone(self),
            poll_interval: self.config.poll_interval,
            cancel: cancel.clone(),
        };
        tokio::spawn(follower.run());

        state.detach(job_id);
        state.feeds.insert(
            job_id,
            FeedAttachment {
                remote_id,
                mode: FeedMode::Streaming,
                cancel,
            },
        );
    }

    async fn finish_with_error(&self, job_id: JobId, error: String) {
        {
            let mut state = self.state.lock().await;
            let Some(job) = state.job_mut(job_id) else {
                return;
            };
            if job.fail(error, Utc::now()).is_err() {
                return;
            }
            state.detach(job_id);
            state.release_current();
        }
        self.emit(QueueEvent::JobFinished {
            job_id,
            status: JobStatus::Failed,
        });
        self.bump();
    }

    async fn loop_halted(&self, reason: String) {
        {
            let mut state = self.state.lock().await;
            state.loop_active = false;
            state.current = None;
            state.run_state = RunState::Idle;
        }
        self.emit(QueueEvent::LoopHalted { reason });
        self.emit(QueueEvent::RunStateChanged { running: false });
        self.bump();
    }

    // ---- private helpers ----

    fn emit(&self, event: QueueEvent) {
        let _ = self.event_tx.send(event);
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }
}

#[async_trait]
impl ReportSink for QueueManager {
    async fn apply_report(&self, job_id: JobId, remote_id: &str, report: FeedReport) -> Applied {
        let mut state = self.state.lock().await;
        let attached = state
            .feeds
            .get(&job_id)
            .is_some_and(|f| f.remote_id == remote_id);
        if !attached {
            tracing::debug!(%job_id, remote_id, "Ignoring report for detached feed");
            return Applied::Detached;
        }
        let Some(job) = state.job_mut(job_id) else {
            return Applied::Detached;
        };

        let now = Utc::now();
        let outcome = match report {
            FeedReport::Snapshot(snapshot) => job.apply_remote(&snapshot, now),
            FeedReport::Error { message, snapshot } => {
                tracing::warn!(%job_id, remote_id, error = %message, "Backend reported an error");
                job.errors.push(message);
                match snapshot {
                    Some(snapshot) => job.apply_remote(&snapshot, now),
                    None => MergeOutcome::default(),
                }
            }
            FeedReport::Missing { reason } => {
                tracing::warn!(%job_id, remote_id, %reason, "Backend lost the job");
                match job.fail(reason, now) {
                    Ok(()) => MergeOutcome {
                        finished: Some(JobStatus::Failed),
                        ..Default::default()
                    },
                    Err(_) => MergeOutcome {
                        ignored: true,
                        ..Default::default()
                    },
                }
            }
        };

        if outcome.ignored {
            state.detach(job_id);
            return Applied::Detached;
        }
        if outcome.normalized {
            tracing::warn!(
                %job_id,
                remote_id,
                "Backend counters were inconsistent and have been normalized",
            );
        }

        let progress = job.progress;
        let finished = outcome.finished;
        if let Some(status) = finished {
            tracing::info!(
                %job_id,
                remote_id,
                %status,
                successful = progress.successful_files,
                failed = progress.failed_files,
                "Job finished",
            );
            state.feeds.remove(&job_id);
            state.release_current();
        }
        drop(state);

        self.emit(QueueEvent::JobProgress {
            job_id,
            processed_files: progress.processed_files,
            total_files: progress.total_files,
            percentage: progress.percentage,
        });
        if let Some(status) = finished {
            self.emit(QueueEvent::JobFinished { job_id, status });
        }
        self.bump();

        if finished.is_some() {
            Applied::Finished
        } else {
            Applied::Continue
        }
    }

    async fn feed_mode_changed(&self, job_id: JobId, mode: FeedMode, failure: &FeedFailure) {
        {
            let mut state = self.state.lock().await;
            match state.feeds.get_mut(&job_id) {
                Some(feed) => feed.mode = mode,
                None => return,
            }
        }
        tracing::debug!(%job_id, ?mode, reason = %failure, "Feed mode changed");
        self.emit(QueueEvent::FeedModeChanged { job_id, mode });
        self.bump();
    }
}

fn no_eligible_files(skipped: &[SkippedFile]) -> CoreError {
    CoreError::Validation(format!(
        "No eligible files to upload ({} skipped)",
        skipped.len()
    ))
}

fn check_batch(
    mode: IngestMode,
    accepted: &[LocalFile],
    settings: &JobSettings,
) -> Result<(), CoreError> {
    if accepted.is_empty() {
        return Err(CoreError::Validation("No eligible files to upload".to_string()));
    }
    match mode {
        IngestMode::Archive if accepted.len() != 1 => Err(CoreError::Validation(format!(
            "Archive jobs take exactly one bundle, got {}",
            accepted.len()
        ))),
        IngestMode::Files | IngestMode::Directory if accepted.len() > settings.batch_size => {
            Err(CoreError::Validation(format!(
                "{} files exceed the batch size of {}; use enqueue_batches",
                accepted.len(),
                settings.batch_size
            )))
        }
        _ => Ok(()),
    }
}
