//! Job Record state machine.
//!
//! A [`JobRecord`] tracks one submitted batch: its settings, the ordered
//! per-file [`FileEntry`] list, the counters mirrored from the backend,
//! timestamps, and an append-only error log.
//!
//! Status transitions:
//!
//! ```text
//! queued ──> processing ──> completed | failed | cancelled
//!   │  ^          (remote snapshot merges)
//!   v  │
//! paused                    failed ──retry──> queued
//! ```
//!
//! Counters are never derived from `files`; they are taken from
//! [`RemoteSnapshot`]s and normalized so that
//! `processed == successful + failed` and `processed <= total` always hold
//! once a job has left `queued`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backfill::backfill_file_statuses;
use crate::error::CoreError;
use crate::files::{IngestMode, LocalFile, SkippedFile, BYTES_PER_MB};
use crate::types::{JobId, RemoteJobId, Timestamp};

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Local lifecycle status of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal records only change through removal or retry.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job status as reported by the ingestion backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl RemoteStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Local status a terminal remote status maps to.
    fn terminal_job_status(self) -> Option<JobStatus> {
        match self {
            Self::Completed => Some(JobStatus::Completed),
            Self::Failed => Some(JobStatus::Failed),
            Self::Cancelled => Some(JobStatus::Cancelled),
            Self::Pending | Self::Processing => None,
        }
    }
}

/// Per-file status. Only ever advances, except through retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl FileStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Processing => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    pub fn is_done(self) -> bool {
        self.rank() == 2
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Default per-file size limit (500 MB, the backend's form default).
pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 500 * BYTES_PER_MB;

/// Default number of files per submission (the backend rejects more).
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Most File Entries a record grows to from backend-reported totals.
pub const MAX_TRACKED_FILES: usize = 10_000;

/// Configuration captured when a job is enqueued. Never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSettings {
    pub preserve_structure: bool,
    pub skip_unsupported: bool,
    pub max_file_size_bytes: u64,
    pub batch_size: usize,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            preserve_structure: true,
            skip_unsupported: true,
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl JobSettings {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.batch_size == 0 {
            return Err(CoreError::Validation(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.max_file_size_bytes == 0 {
            return Err(CoreError::Validation(
                "max_file_size_bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Size limit rounded up to whole megabytes, as the backend form expects.
    pub fn max_file_size_mb(&self) -> u64 {
        self.max_file_size_bytes.div_ceil(BYTES_PER_MB)
    }
}

// ---------------------------------------------------------------------------
// File entries
// ---------------------------------------------------------------------------

/// Status of one file within a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub file: LocalFile,
    pub status: FileStatus,
    /// Coarse 0-100; only file-count progress is tracked, not bytes.
    pub progress: u8,
    /// Set only while `status` is [`FileStatus::Failed`].
    pub error: Option<String>,
}

impl FileEntry {
    pub fn new(file: LocalFile) -> Self {
        Self {
            file,
            status: FileStatus::Pending,
            progress: 0,
            error: None,
        }
    }

    /// Move forward to `status`. Returns `false` (and changes nothing) if
    /// that would not be an advance.
    pub fn advance(&mut self, status: FileStatus) -> bool {
        if status.rank() <= self.status.rank() {
            return false;
        }
        self.status = status;
        match status {
            FileStatus::Pending | FileStatus::Processing => self.progress = 0,
            FileStatus::Completed => self.progress = 100,
            FileStatus::Failed => {
                self.progress = 100;
                self.error = Some("Processing failed on the backend".to_string());
            }
        }
        true
    }

    fn reset_for_retry(&mut self) {
        if self.status != FileStatus::Completed {
            self.status = FileStatus::Pending;
            self.progress = 0;
            self.error = None;
        }
    }
}

// ---------------------------------------------------------------------------
// Progress and timestamps
// ---------------------------------------------------------------------------

/// Aggregate counters mirrored from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct JobProgress {
    pub total_files: u32,
    pub processed_files: u32,
    pub successful_files: u32,
    pub failed_files: u32,
    pub percentage: f64,
}

impl JobProgress {
    /// Fresh counters for `total` not-yet-processed files.
    pub fn fresh(total: u32) -> Self {
        Self {
            total_files: total,
            ..Default::default()
        }
    }

    /// `processed == successful + failed` and `processed <= total`.
    pub fn is_consistent(&self) -> bool {
        self.successful_files.checked_add(self.failed_files) == Some(self.processed_files)
            && self.processed_files <= self.total_files
    }

    /// Force the counter invariants. `processed` is recomputed from the
    /// outcome counters and `total` raised to cover it. Outcome counters
    /// whose sum does not fit in a `u32` have `failed` clamped. Returns
    /// whether anything had to change.
    pub fn normalize(&mut self) -> bool {
        let before = *self;
        self.failed_files = self.failed_files.min(u32::MAX - self.successful_files);
        self.processed_files = self.successful_files + self.failed_files;
        self.total_files = self.total_files.max(self.processed_files);
        before != *self
    }

    /// Processed share while running, success share once finished,
    /// rounded to one decimal.
    pub fn computed_percentage(&self, terminal: bool) -> f64 {
        if self.total_files == 0 {
            return 0.0;
        }
        let numerator = if terminal {
            self.successful_files
        } else {
            self.processed_files
        };
        let pct = numerator as f64 / self.total_files as f64 * 100.0;
        (pct * 10.0).round() / 10.0
    }

    /// Every file has been accounted for.
    pub fn is_exhausted(&self) -> bool {
        self.total_files > 0 && self.processed_files >= self.total_files
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTimestamps {
    pub queued_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

// ---------------------------------------------------------------------------
// Remote snapshot
// ---------------------------------------------------------------------------

/// Backend counters before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RemoteCounters {
    pub total_files: u32,
    pub processed_files: u32,
    pub successful_files: u32,
    pub failed_files: u32,
    pub percentage: Option<f64>,
}

/// Everything a backend report (feed event or poll response) says about
/// one job, in the shape the state machine merges.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSnapshot {
    pub status: RemoteStatus,
    pub counters: RemoteCounters,
    /// File names in backend order, when the backend reports them.
    pub file_list: Vec<String>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    /// Full backend error log, already rendered to strings.
    pub errors: Vec<String>,
}

/// What a merge changed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MergeOutcome {
    /// The merge was discarded because the record is already terminal.
    pub ignored: bool,
    /// Set when this merge moved the record into a terminal status.
    pub finished: Option<JobStatus>,
    /// Errors appended to the record by this merge.
    pub new_errors: Vec<String>,
    /// Backend counters violated the invariants and were corrected.
    pub normalized: bool,
}

// ---------------------------------------------------------------------------
// Job record
// ---------------------------------------------------------------------------

/// One tracked batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    /// Assigned by the backend on successful submission.
    pub remote_id: Option<RemoteJobId>,
    pub mode: IngestMode,
    /// Ordered; insertion order is submission order.
    pub files: Vec<FileEntry>,
    /// The archive blob actually uploaded, for [`IngestMode::Archive`].
    pub bundle: Option<LocalFile>,
    /// Files excluded at enqueue time.
    pub skipped: Vec<SkippedFile>,
    pub settings: JobSettings,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub timestamps: JobTimestamps,
    /// Append-only, except for retry which clears it.
    pub errors: Vec<String>,
    /// How many backend error entries have already been appended.
    #[serde(skip)]
    remote_errors_seen: usize,
}

impl JobRecord {
    /// Create a `queued` record.
    ///
    /// For [`IngestMode::Archive`] `files` must hold exactly the bundle;
    /// it becomes both the upload blob and the single placeholder entry
    /// until the backend reports the expanded contents.
    pub fn new(
        mode: IngestMode,
        files: Vec<LocalFile>,
        skipped: Vec<SkippedFile>,
        settings: JobSettings,
        now: Timestamp,
    ) -> Self {
        let bundle = match mode {
            IngestMode::Archive => files.first().cloned(),
            IngestMode::Files | IngestMode::Directory => None,
        };
        let files: Vec<FileEntry> = files.into_iter().map(FileEntry::new).collect();
        Self {
            id: uuid::Uuid::new_v4(),
            remote_id: None,
            mode,
            progress: JobProgress::fresh(files.len() as u32),
            files,
            bundle,
            skipped,
            settings,
            status: JobStatus::Queued,
            timestamps: JobTimestamps {
                queued_at: now,
                started_at: None,
                completed_at: None,
            },
            errors: Vec::new(),
            remote_errors_seen: 0,
        }
    }

    /// Rebuild a record for a job that is already running remotely.
    ///
    /// Per-file statuses come from [`backfill_file_statuses`], so they are
    /// only as precise as the aggregate counters allow.
    pub fn adopt_remote(
        remote_id: RemoteJobId,
        settings: JobSettings,
        snapshot: &RemoteSnapshot,
        queued_at: Timestamp,
    ) -> Self {
        let mut counters = JobProgress {
            total_files: snapshot.counters.total_files,
            processed_files: snapshot.counters.processed_files,
            successful_files: snapshot.counters.successful_files,
            failed_files: snapshot.counters.failed_files,
            percentage: 0.0,
        };
        counters.normalize();
        counters.total_files = counters.total_files.max(snapshot.file_list.len() as u32);

        let mut files: Vec<FileEntry> = snapshot
            .file_list
            .iter()
            .map(|name| FileEntry::new(remote_file(name)))
            .collect();
        pad_entries(
            &mut files,
            (counters.total_files as usize).min(MAX_TRACKED_FILES),
            "remote",
        );

        let statuses = backfill_file_statuses(
            files.len(),
            counters.successful_files,
            counters.processed_files,
        );
        for (entry, status) in files.iter_mut().zip(statuses) {
            entry.advance(status);
        }

        counters.percentage = snapshot
            .counters
            .percentage
            .unwrap_or_else(|| counters.computed_percentage(false));

        Self {
            id: uuid::Uuid::new_v4(),
            remote_id: Some(remote_id),
            mode: IngestMode::Files,
            files,
            bundle: None,
            skipped: Vec::new(),
            settings,
            status: JobStatus::Processing,
            progress: counters,
            timestamps: JobTimestamps {
                queued_at,
                started_at: snapshot.started_at.or(Some(queued_at)),
                completed_at: None,
            },
            errors: snapshot.errors.clone(),
            remote_errors_seen: snapshot.errors.len(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The files to put on the wire: the bundle for archives, otherwise
    /// every entry in order (retries resubmit the whole batch).
    pub fn submission_files(&self) -> Vec<LocalFile> {
        match &self.bundle {
            Some(bundle) => vec![bundle.clone()],
            None => self.files.iter().map(|e| e.file.clone()).collect(),
        }
    }

    // ---- transitions ----

    /// `queued -> processing`, stamping `started_at`.
    pub fn start(&mut self, now: Timestamp) -> Result<(), CoreError> {
        if self.status != JobStatus::Queued {
            return Err(self.invalid_transition(JobStatus::Processing));
        }
        self.status = JobStatus::Processing;
        self.timestamps.started_at = Some(now);
        self.timestamps.completed_at = None;
        self.progress = JobProgress::fresh(self.files.len() as u32);
        Ok(())
    }

    /// Record the backend identifier after a successful submission.
    pub fn mark_submitted(&mut self, remote_id: RemoteJobId) -> Result<(), CoreError> {
        if self.status != JobStatus::Processing {
            return Err(self.invalid_transition(JobStatus::Processing));
        }
        self.remote_id = Some(remote_id);
        self.progress.total_files = self.files.len() as u32;
        Ok(())
    }

    /// Any non-terminal status `-> failed`, appending `error`.
    pub fn fail(&mut self, error: impl Into<String>, now: Timestamp) -> Result<(), CoreError> {
        if self.is_terminal() {
            return Err(self.invalid_transition(JobStatus::Failed));
        }
        self.errors.push(error.into());
        self.finish(JobStatus::Failed, now);
        Ok(())
    }

    /// Any non-terminal status `-> cancelled`.
    pub fn cancel(&mut self, now: Timestamp) -> Result<(), CoreError> {
        if self.is_terminal() {
            return Err(self.invalid_transition(JobStatus::Cancelled));
        }
        self.finish(JobStatus::Cancelled, now);
        Ok(())
    }

    /// `queued -> paused`. Returns whether the status changed.
    pub fn pause(&mut self) -> bool {
        if self.status == JobStatus::Queued {
            self.status = JobStatus::Paused;
            true
        } else {
            false
        }
    }

    /// `paused -> queued`. Returns whether the status changed.
    pub fn unpause(&mut self) -> bool {
        if self.status == JobStatus::Paused {
            self.status = JobStatus::Queued;
            true
        } else {
            false
        }
    }

    /// `failed -> queued` for another full submission.
    ///
    /// Failed and unfinished entries go back to `pending`; completed
    /// entries are left as they are, but the whole batch is resubmitted
    /// and the backend decides what to skip. The job is re-stamped so it
    /// joins the back of the queue. Returns `false` (no change) for any
    /// other status.
    pub fn retry(&mut self, now: Timestamp) -> bool {
        if self.status != JobStatus::Failed {
            return false;
        }
        for entry in &mut self.files {
            entry.reset_for_retry();
        }
        self.errors.clear();
        self.remote_errors_seen = 0;
        self.remote_id = None;
        self.status = JobStatus::Queued;
        self.progress = JobProgress::fresh(self.files.len() as u32);
        self.timestamps = JobTimestamps {
            queued_at: now,
            started_at: None,
            completed_at: None,
        };
        true
    }

    /// Merge a backend report into the record.
    ///
    /// Last write wins per field: counters, percentage and timestamps are
    /// replaced by the backend's values. Errors are appended (only the
    /// entries not seen in earlier reports). File Entries are advanced
    /// positionally from the counters and never moved backwards. The job
    /// finishes when the backend reports a terminal status or every file
    /// has been processed.
    pub fn apply_remote(&mut self, snapshot: &RemoteSnapshot, now: Timestamp) -> MergeOutcome {
        if self.is_terminal() {
            return MergeOutcome {
                ignored: true,
                ..Default::default()
            };
        }
        let mut outcome = MergeOutcome::default();

        let mut progress = JobProgress {
            total_files: snapshot.counters.total_files,
            processed_files: snapshot.counters.processed_files,
            successful_files: snapshot.counters.successful_files,
            failed_files: snapshot.counters.failed_files,
            percentage: 0.0,
        };
        outcome.normalized = progress.normalize();

        self.expand_entries(progress.total_files as usize, &snapshot.file_list);
        progress.total_files = progress.total_files.max(self.files.len() as u32);

        let finished = snapshot
            .status
            .terminal_job_status()
            .or_else(|| progress.is_exhausted().then_some(JobStatus::Completed));

        progress.percentage = snapshot
            .counters
            .percentage
            .unwrap_or_else(|| progress.computed_percentage(finished.is_some()));
        self.progress = progress;

        self.advance_entries(finished.is_some());

        if snapshot.errors.len() < self.remote_errors_seen {
            self.remote_errors_seen = snapshot.errors.len();
        }
        outcome.new_errors = snapshot.errors[self.remote_errors_seen..].to_vec();
        self.remote_errors_seen = snapshot.errors.len();
        self.errors.extend(outcome.new_errors.iter().cloned());

        if let Some(started_at) = snapshot.started_at {
            self.timestamps.started_at = Some(started_at);
        }

        if let Some(status) = finished {
            self.finish(status, snapshot.completed_at.unwrap_or(now));
            outcome.finished = Some(status);
        }
        outcome
    }

    // ---- private helpers ----

    /// File Entries keep whatever status they reached.
    fn finish(&mut self, status: JobStatus, at: Timestamp) {
        self.status = status;
        self.timestamps.completed_at = Some(at);
    }

    /// Keep `files.len() == total` (up to [`MAX_TRACKED_FILES`]) when the
    /// backend knows about more files than were submitted (archive
    /// contents).
    fn expand_entries(&mut self, total: usize, file_list: &[String]) {
        let total = total.min(MAX_TRACKED_FILES);
        if total <= self.files.len() {
            return;
        }
        if let Some(bundle) = &self.bundle {
            if self.files.len() == 1 && self.files[0].file == *bundle {
                let archive = bundle.clone();
                self.files = (0..total)
                    .map(|i| {
                        let name = file_list
                            .get(i)
                            .cloned()
                            .unwrap_or_else(|| format!("{}#{}", archive.name, i + 1));
                        let mut file = LocalFile::new(archive.path.clone(), 0);
                        file.name = name.clone();
                        file.relative_path = Some(name);
                        FileEntry::new(file)
                    })
                    .collect();
                return;
            }
        }
        let label = self
            .bundle
            .as_ref()
            .map(|b| b.name.clone())
            .unwrap_or_else(|| "remote".to_string());
        let start = self.files.len();
        for name in file_list.iter().skip(start).take(total - start) {
            self.files.push(FileEntry::new(remote_file(name)));
        }
        pad_entries(&mut self.files, total, &label);
    }

    fn advance_entries(&mut self, finished: bool) {
        let statuses = backfill_file_statuses(
            self.files.len(),
            self.progress.successful_files,
            self.progress.processed_files,
        );
        for (entry, status) in self.files.iter_mut().zip(statuses) {
            entry.advance(status);
        }
        if !finished {
            if let Some(next) = self.files.get_mut(self.progress.processed_files as usize) {
                next.advance(FileStatus::Processing);
            }
        }
    }

    fn invalid_transition(&self, to: JobStatus) -> CoreError {
        CoreError::Conflict(format!(
            "Job {} cannot move from {} to {}",
            self.id, self.status, to
        ))
    }
}

fn remote_file(name: &str) -> LocalFile {
    let mut file = LocalFile::new(name, 0);
    file.relative_path = Some(name.to_string());
    file
}

fn pad_entries(files: &mut Vec<FileEntry>, total: usize, label: &str) {
    while files.len() < total {
        let name = format!("{label}#{}", files.len() + 1);
        files.push(FileEntry::new(remote_file(&name)));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
