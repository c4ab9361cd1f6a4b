//! Ingestion backend payloads and live-feed message types.
//!
//! The backend describes a job with the same JSON object everywhere
//! (`GET /jobs`, `GET /jobs/{id}`, and inside feed events). Live-feed
//! frames have the shape `{"type": "<kind>", "data": {...}}`, except
//! `error` frames which carry a `message` and optionally `data`. This
//! module deserializes both into typed values and converts a backend job
//! into the [`RemoteSnapshot`] the Job Record state machine merges.

use chrono::{NaiveDateTime, TimeZone, Utc};
use kbingest_core::job::{JobSettings, RemoteCounters, RemoteSnapshot, RemoteStatus};
use kbingest_core::types::Timestamp;
use serde::{Deserialize, Deserializer};

// ---------------------------------------------------------------------------
// Backend job
// ---------------------------------------------------------------------------

/// One job as the backend reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendJob {
    /// Backend-assigned identifier.
    pub job_id: String,
    pub status: RemoteStatus,
    #[serde(default)]
    pub progress: BackendProgress,
    /// Names of the files in the job, in backend order.
    #[serde(default)]
    pub file_list: Option<Vec<String>>,
    #[serde(default)]
    pub timestamps: BackendTimestamps,
    /// Flat timestamp fields, used by list responses that do not nest them.
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub created_at: Option<Timestamp>,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub started_at: Option<Timestamp>,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub completed_at: Option<Timestamp>,
    /// Error log entries; either plain strings or `{"file", "error"}` objects.
    #[serde(default, alias = "error_log")]
    pub errors: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub metadata: Option<BackendJobMetadata>,
}

/// Aggregate counters. Missing fields count as zero.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct BackendProgress {
    #[serde(default)]
    pub total_files: u32,
    #[serde(default)]
    pub processed_files: u32,
    #[serde(default)]
    pub successful_files: u32,
    #[serde(default)]
    pub failed_files: u32,
    #[serde(default)]
    pub percentage: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendTimestamps {
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub created_at: Option<Timestamp>,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub started_at: Option<Timestamp>,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub completed_at: Option<Timestamp>,
}

/// Settings the job was submitted with, when the backend echoes them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendJobMetadata {
    #[serde(default)]
    pub preserve_structure: Option<bool>,
    #[serde(default)]
    pub skip_unsupported: Option<bool>,
}

impl BackendJob {
    pub fn created_at(&self) -> Option<Timestamp> {
        self.timestamps.created_at.or(self.created_at)
    }

    pub fn started_at(&self) -> Option<Timestamp> {
        self.timestamps.started_at.or(self.started_at)
    }

    pub fn completed_at(&self) -> Option<Timestamp> {
        self.timestamps.completed_at.or(self.completed_at)
    }

    /// File manifest, empty when the backend did not report one.
    pub fn file_list(&self) -> &[String] {
        self.file_list.as_deref().unwrap_or_default()
    }

    /// Error log rendered to display strings, in backend order.
    pub fn rendered_errors(&self) -> Vec<String> {
        self.errors
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(render_error_entry)
            .collect()
    }

    /// Settings for a job adopted from the backend: echoed flags win,
    /// everything else comes from `defaults`.
    pub fn settings(&self, defaults: &JobSettings) -> JobSettings {
        let meta = self.metadata.clone().unwrap_or_default();
        JobSettings {
            preserve_structure: meta.preserve_structure.unwrap_or(defaults.preserve_structure),
            skip_unsupported: meta.skip_unsupported.unwrap_or(defaults.skip_unsupported),
            ..defaults.clone()
        }
    }

    /// Convert into the shape merged by [`kbingest_core::job::JobRecord`].
    pub fn to_snapshot(&self) -> RemoteSnapshot {
        RemoteSnapshot {
            status: self.status,
            counters: RemoteCounters {
                total_files: self.progress.total_files,
                processed_files: self.progress.processed_files,
                successful_files: self.progress.successful_files,
                failed_files: self.progress.failed_files,
                percentage: self.progress.percentage,
            },
            file_list: self.file_list().to_vec(),
            started_at: self.started_at(),
            completed_at: self.completed_at(),
            errors: self.rendered_errors(),
        }
    }
}

/// Render one error-log entry.
///
/// - `"text"` -> `text`
/// - `{"file": f, "error": e}` -> `f: e`
/// - `{"error": e}` -> `e`
/// - anything else -> its JSON text
pub fn render_error_entry(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(map) => {
            let error = map.get("error").and_then(|v| v.as_str());
            let file = map.get("file").and_then(|v| v.as_str());
            match (file, error) {
                (Some(file), Some(error)) => format!("{file}: {error}"),
                (None, Some(error)) => error.to_string(),
                _ => value.to_string(),
            }
        }
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// REST responses
// ---------------------------------------------------------------------------

/// Response of `POST /jobs`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    pub job_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// `GET /jobs` returns either a bare array or `{"jobs": [...], "total": n}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum JobListBody {
    Wrapped { jobs: Vec<BackendJob> },
    Bare(Vec<BackendJob>),
}

impl JobListBody {
    pub(crate) fn into_jobs(self) -> Vec<BackendJob> {
        match self {
            Self::Wrapped { jobs } | Self::Bare(jobs) => jobs,
        }
    }
}

// ---------------------------------------------------------------------------
// Live feed
// ---------------------------------------------------------------------------

/// All known live-feed event kinds.
///
/// Deserialized via the internally-tagged `"type"` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum FeedEvent {
    /// Initial full status sent when the feed opens.
    #[serde(rename = "job_status")]
    JobStatus { data: BackendJob },

    /// Counters changed.
    #[serde(rename = "progress_update")]
    ProgressUpdate { data: BackendJob },

    /// The job reached a terminal status; the feed closes after this.
    #[serde(rename = "job_complete")]
    JobComplete { data: BackendJob },

    /// The backend hit an error while producing the feed or the job.
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        data: Option<BackendJob>,
    },
}

impl FeedEvent {
    /// Discriminator string, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JobStatus { .. } => "job_status",
            Self::ProgressUpdate { .. } => "progress_update",
            Self::JobComplete { .. } => "job_complete",
            Self::Error { .. } => "error",
        }
    }

    /// The job payload, if the event carries one.
    pub fn job(&self) -> Option<&BackendJob> {
        match self {
            Self::JobStatus { data }
            | Self::ProgressUpdate { data }
            | Self::JobComplete { data } => Some(data),
            Self::Error { data, .. } => data.as_ref(),
        }
    }

    /// `job_complete`, or `error` carrying a terminal job status.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::JobComplete { .. } => true,
            Self::Error { data, .. } => data.as_ref().is_some_and(|d| d.status.is_terminal()),
            Self::JobStatus { .. } | Self::ProgressUpdate { .. } => false,
        }
    }
}

/// Parse a live-feed `data:` payload into a typed event.
///
/// Returns `Err` for malformed JSON or unknown `type` values.
/// Callers should log and continue.
pub fn parse_message(text: &str) -> Result<FeedEvent, serde_json::Error> {
    serde_json::from_str(text)
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Parse RFC 3339, or a naive ISO-8601 timestamp which is taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn de_opt_timestamp<'de, D>(deserializer: D) -> Result<Option<Timestamp>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    const JOB_JSON: &str = r#"{
        "id": 7,
        "job_id": "upload_1700000000_ab12cd34",
        "collection_id": 3,
        "status": "processing",
        "progress": {"total_files": 5, "processed_files": 2, "successful_files": 2, "failed_files": 0, "percentage": 40.0},
        "timestamps": {"created_at": "2024-05-01T10:00:00", "started_at": "2024-05-01T10:00:01.250000", "completed_at": null},
        "metadata": {"upload_path": null, "preserve_structure": false, "skip_unsupported": true},
        "errors": []
    }"#;

    #[test]
    fn parse_backend_job() {
        let job: BackendJob = serde_json::from_str(JOB_JSON).unwrap();
        assert_eq!(job.job_id, "upload_1700000000_ab12cd34");
        assert_eq!(job.status, RemoteStatus::Processing);
        assert_eq!(job.progress.processed_files, 2);
        assert_eq!(job.progress.percentage, Some(40.0));
        assert_eq!(job.started_at().unwrap().year(), 2024);
        assert!(job.completed_at().is_none());
        assert!(job.file_list().is_empty());
    }

    #[test]
    fn flat_timestamps_and_error_log_alias() {
        let json = r#"{"job_id":"j","status":"pending","file_list":["a.md"],
            "created_at":"2024-05-01T10:00:00Z","error_log":["boom"]}"#;
        let job: BackendJob = serde_json::from_str(json).unwrap();
        assert!(job.created_at().is_some());
        assert_eq!(job.file_list(), ["a.md".to_string()]);
        assert_eq!(job.rendered_errors(), vec!["boom".to_string()]);
    }

    #[test]
    fn render_error_shapes() {
        let v = serde_json::json!({"file": "a.pdf", "error": "encrypted"});
        assert_eq!(render_error_entry(&v), "a.pdf: encrypted");
        let v = serde_json::json!({"error": "timeout", "timestamp": "2024-01-01T00:00:00"});
        assert_eq!(render_error_entry(&v), "timeout");
        let v = serde_json::json!(42);
        assert_eq!(render_error_entry(&v), "42");
    }

    #[test]
    fn settings_prefer_echoed_flags() {
        let job: BackendJob = serde_json::from_str(JOB_JSON).unwrap();
        let settings = job.settings(&JobSettings::default());
        assert!(!settings.preserve_structure);
        assert!(settings.skip_unsupported);
        assert_eq!(settings.batch_size, JobSettings::default().batch_size);
    }

    #[test]
    fn snapshot_carries_counters() {
        let job: BackendJob = serde_json::from_str(JOB_JSON).unwrap();
        let snap = job.to_snapshot();
        assert_eq!(snap.counters.total_files, 5);
        assert_eq!(snap.counters.successful_files, 2);
        assert_eq!(snap.status, RemoteStatus::Processing);
    }

    #[test]
    fn parse_progress_update() {
        let json = format!(r#"{{"type":"progress_update","data":{JOB_JSON}}}"#);
        let event = parse_message(&json).unwrap();
        assert_eq!(event.kind(), "progress_update");
        assert!(!event.is_terminal());
        assert_eq!(event.job().unwrap().progress.total_files, 5);
    }

    #[test]
    fn parse_job_complete_is_terminal() {
        let json = r#"{"type":"job_complete","data":{"job_id":"j","status":"completed"}}"#;
        let event = parse_message(json).unwrap();
        assert!(event.is_terminal());
    }

    #[test]
    fn parse_error_without_data() {
        let event = parse_message(r#"{"type":"error","message":"db gone"}"#).unwrap();
        match &event {
            FeedEvent::Error { message, data } => {
                assert_eq!(message.as_deref(), Some("db gone"));
                assert!(data.is_none());
            }
            other => panic!("Expected Error, got {other:?}"),
        }
        assert!(!event.is_terminal());
    }

    #[test]
    fn parse_error_with_terminal_status() {
        let json = r#"{"type":"error","message":"x","data":{"job_id":"j","status":"failed"}}"#;
        assert!(parse_message(json).unwrap().is_terminal());
    }

    #[test]
    fn parse_unknown_type_returns_error() {
        assert!(parse_message(r#"{"type":"heartbeat"}"#).is_err());
    }

    #[test]
    fn parse_invalid_json_returns_error() {
        assert!(parse_message("not json at all").is_err());
    }

    #[test]
    fn job_list_body_accepts_both_shapes() {
        let wrapped: JobListBody =
            serde_json::from_str(r#"{"jobs":[{"job_id":"a","status":"pending"}],"total":1}"#)
                .unwrap();
        assert_eq!(wrapped.into_jobs().len(), 1);
        let bare: JobListBody =
            serde_json::from_str(r#"[{"job_id":"a","status":"pending"}]"#).unwrap();
        assert_eq!(bare.into_jobs().len(), 1);
    }

    #[test]
    fn parse_timestamp_variants() {
        assert!(parse_timestamp("2024-05-01T10:00:00+02:00").is_some());
        assert!(parse_timestamp("2024-05-01T10:00:00").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }
}
