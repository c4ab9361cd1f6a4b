//! Startup reconciliation.
//!
//! A restarted client asks the backend which jobs are still running and
//! rebuilds Job Records for them so their progress keeps being observed.

use std::sync::Arc;

use chrono::Utc;
use kbingest_client::api::ApiError;
use kbingest_client::backend::IngestBackend;
use kbingest_client::messages::BackendJob;
use kbingest_core::job::{JobRecord, JobSettings, RemoteStatus};

/// Why a backend job was not adopted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Excluded {
    #[error("job is {0:?}, not in flight")]
    NotInFlight(RemoteStatus),

    #[error("job has no file manifest")]
    NoManifest,

    /// Every file was processed and none succeeded; the backend will not
    /// make further progress on it.
    #[error("stuck job: {processed}/{total} processed, none successful")]
    StuckJob { processed: u32, total: u32 },
}

/// Decide whether a backend job should be adopted.
pub fn admit(job: &BackendJob) -> Result<(), Excluded> {
    if !matches!(job.status, RemoteStatus::Pending | RemoteStatus::Processing) {
        return Err(Excluded::NotInFlight(job.status));
    }
    if job.file_list().is_empty() {
        return Err(Excluded::NoManifest);
    }
    let progress = &job.progress;
    if progress.processed_files == progress.total_files && progress.successful_files == 0 {
        return Err(Excluded::StuckJob {
            processed: progress.processed_files,
            total: progress.total_files,
        });
    }
    Ok(())
}

pub struct Reconciler {
    backend: Arc<dyn IngestBackend>,
    default_settings: JobSettings,
}

impl Reconciler {
    pub fn new(backend: Arc<dyn IngestBackend>, default_settings: JobSettings) -> Self {
        Self {
            backend,
            default_settings,
        }
    }

    /// Fetch the backend's jobs and rebuild records for those in flight.
    ///
    /// Per-file statuses of the returned records are back-filled from the
    /// aggregate counters and therefore approximate.
    pub async fn reconcile(&self) -> Result<Vec<JobRecord>, ApiError> {
        let jobs = self.backend.list_jobs().await?;
        let listed = jobs.len();

        let records: Vec<JobRecord> = jobs
            .iter()
            .filter(|job| match admit(job) {
                Ok(()) => true,
                Err(reason) => {
                    tracing::debug!(remote_id = %job.job_id, %reason, "Not reconciling job");
                    false
                }
            })
            .map(|job| {
                JobRecord::adopt_remote(
                    job.job_id.clone(),
                    job.settings(&self.default_settings),
                    &job.to_snapshot(),
                    job.created_at().unwrap_or_else(Utc::now),
                )
            })
            .collect();

        tracing::info!(listed, adopted = records.len(), "Reconciled backend jobs");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn backend_job(status: &str, files: usize, processed: u32, successful: u32) -> BackendJob {
        let file_list: Vec<String> = (0..files).map(|i| format!("f{i}.md")).collect();
        serde_json::from_value(serde_json::json!({
            "job_id": "upload_1",
            "status": status,
            "file_list": file_list,
            "progress": {
                "total_files": files,
                "processed_files": processed,
                "successful_files": successful,
                "failed_files": processed - successful,
            }
        }))
        .unwrap()
    }

    #[test]
    fn running_job_is_admitted() {
        assert_eq!(admit(&backend_job("processing", 3, 1, 1)), Ok(()));
        assert_eq!(admit(&backend_job("pending", 3, 0, 0)), Ok(()));
    }

    #[test]
    fn stuck_job_is_excluded() {
        assert_matches!(
            admit(&backend_job("processing", 3, 3, 0)),
            Err(Excluded::StuckJob { processed: 3, total: 3 })
        );
    }

    #[test]
    fn finished_job_is_excluded() {
        assert_matches!(
            admit(&backend_job("completed", 3, 3, 3)),
            Err(Excluded::NotInFlight(RemoteStatus::Completed))
        );
    }

    #[test]
    fn job_without_manifest_is_excluded() {
        assert_eq!(admit(&backend_job("processing", 0, 0, 0)), Err(Excluded::NoManifest));
    }
}
