//! Queue events for the UI shell.
//!
//! Emitted by the [`QueueManager`](crate::manager::QueueManager) on a
//! [`tokio::sync::broadcast`] channel. Slow subscribers may lag and miss
//! events; the job list itself is always available from the manager.

use kbingest_core::job::JobStatus;
use kbingest_core::types::{JobId, RemoteJobId};
use serde::Serialize;

use crate::feed::FeedMode;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    /// A job was appended to the queue (or adopted by reconciliation).
    JobAdded { job_id: JobId, file_count: usize, skipped: usize },

    /// The processing loop picked the job up.
    JobStarted { job_id: JobId },

    /// The backend accepted the job's upload.
    JobSubmitted { job_id: JobId, remote_id: RemoteJobId },

    /// A backend report changed the job's counters.
    JobProgress {
        job_id: JobId,
        processed_files: u32,
        total_files: u32,
        percentage: f64,
    },

    /// The job reached a terminal status.
    JobFinished { job_id: JobId, status: JobStatus },

    /// A failed job went back to `queued`.
    JobRetried { job_id: JobId },

    JobRemoved { job_id: JobId },

    /// The job's feed switched from the live stream to polling.
    FeedModeChanged { job_id: JobId, mode: FeedMode },

    /// The queue was resumed (`running = true`) or went idle.
    RunStateChanged { running: bool },

    /// The processing loop died unexpectedly and has stopped.
    LoopHalted { reason: String },
}
