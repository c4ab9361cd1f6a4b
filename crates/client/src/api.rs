//! REST API client for the ingestion backend.
//!
//! Wraps job submission (multipart upload), listing, status lookup and
//! cancellation using [`reqwest`].

use std::time::Duration;

use kbingest_core::files::{IngestMode, LocalFile};
use kbingest_core::job::JobSettings;
use reqwest::multipart::{Form, Part};

use crate::messages::{BackendJob, JobListBody, SubmitResponse};

/// Errors from the ingestion REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("Ingestion API error ({status}): {body}")]
    ApiError {
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl ApiError {
    /// The backend does not know the job.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ApiError { status: 404, .. })
    }
}

/// Errors preparing or sending a submission.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("Invalid submission: {0}")]
    Invalid(String),

    #[error("Batch of {count} files exceeds the limit of {limit}")]
    BatchTooLarge { count: usize, limit: usize },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Api(#[from] ApiError),
}

// ---------------------------------------------------------------------------
// Submission request
// ---------------------------------------------------------------------------

/// One batch ready to be uploaded.
#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub mode: IngestMode,
    pub files: Vec<LocalFile>,
    pub settings: JobSettings,
}

impl SubmissionRequest {
    /// Validate the batch shape before anything is read from disk.
    pub fn new(
        mode: IngestMode,
        files: Vec<LocalFile>,
        settings: JobSettings,
    ) -> Result<Self, SubmissionError> {
        if files.is_empty() {
            return Err(SubmissionError::Invalid("no files to submit".to_string()));
        }
        match mode {
            IngestMode::Archive if files.len() != 1 => {
                return Err(SubmissionError::Invalid(format!(
                    "archive submissions carry exactly one file, got {}",
                    files.len()
                )));
            }
            IngestMode::Files | IngestMode::Directory if files.len() > settings.batch_size => {
                return Err(SubmissionError::BatchTooLarge {
                    count: files.len(),
                    limit: settings.batch_size,
                });
            }
            _ => {}
        }
        Ok(Self {
            mode,
            files,
            settings,
        })
    }

    /// Name a file part is uploaded under. Directory uploads keep the
    /// relative path when structure is preserved.
    pub fn part_name(&self, file: &LocalFile) -> String {
        if self.mode == IngestMode::Directory && self.settings.preserve_structure {
            file.display_name().to_string()
        } else {
            file.name.clone()
        }
    }

    /// Build the multipart body, reading every file from disk.
    pub async fn into_form(self) -> Result<Form, SubmissionError> {
        let mut form = Form::new()
            .text("upload_type", self.mode.upload_type())
            .text("preserve_structure", self.settings.preserve_structure.to_string())
            .text("skip_unsupported", self.settings.skip_unsupported.to_string())
            .text("max_file_size_mb", self.settings.max_file_size_mb().to_string());

        let field = match self.mode {
            IngestMode::Archive => "zip_file",
            IngestMode::Files | IngestMode::Directory => "files",
        };

        let mut relative_paths = Vec::with_capacity(self.files.len());
        for file in &self.files {
            let bytes = tokio::fs::read(&file.path)
                .await
                .map_err(|source| SubmissionError::Read {
                    path: file.path.display().to_string(),
                    source,
                })?;
            let name = self.part_name(file);
            relative_paths.push(name.clone());
            form = form.part(field, Part::bytes(bytes).file_name(name));
        }

        if self.mode == IngestMode::Directory && self.settings.preserve_structure {
            let encoded = serde_json::to_string(&relative_paths)
                .map_err(|e| SubmissionError::Invalid(e.to_string()))?;
            form = form.text("relative_paths", encoded);
        }
        Ok(form)
    }
}

// ---------------------------------------------------------------------------
// API client
// ---------------------------------------------------------------------------

/// HTTP client for one ingestion backend.
#[derive(Clone)]
pub struct IngestApi {
    client: reqwest::Client,
    api_url: String,
    request_timeout: Duration,
}

impl IngestApi {
    /// * `api_url` - Base HTTP URL, e.g. `http://localhost:8000`.
    pub fn new(api_url: String, request_timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, request_timeout)
    }

    /// Reuse an existing [`reqwest::Client`] (shared with the feed client
    /// for connection pooling).
    pub fn with_client(
        client: reqwest::Client,
        api_url: String,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client,
            api_url,
            request_timeout,
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Upload a batch via `POST /jobs`. Returns the backend job id.
    pub async fn submit(
        &self,
        request: SubmissionRequest,
    ) -> Result<SubmitResponse, SubmissionError> {
        let count = request.files.len();
        let mode = request.mode;
        let form = request.into_form().await?;

        tracing::debug!(count, mode = mode.upload_type(), "Submitting ingestion batch");
        // Uploads are not bounded by the request timeout.
        let response = self
            .client
            .post(format!("{}/jobs", self.api_url))
            .multipart(form)
            .send()
            .await
            .map_err(ApiError::from)?;

        Ok(Self::parse_response(response).await?)
    }

    /// `GET /jobs`.
    pub async fn list_jobs(&self) -> Result<Vec<BackendJob>, ApiError> {
        let response = self
            .client
            .get(format!("{}/jobs", self.api_url))
            .timeout(self.request_timeout)
            .send()
            .await?;

        let body: JobListBody = Self::parse_response(response).await?;
        Ok(body.into_jobs())
    }

    /// `GET /jobs/{id}`.
    pub async fn get_job(&self, remote_id: &str) -> Result<BackendJob, ApiError> {
        let response = self
            .client
            .get(format!("{}/jobs/{}", self.api_url, remote_id))
            .timeout(self.request_timeout)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// `POST /jobs/{id}/cancel`.
    pub async fn cancel_job(&self, remote_id: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .post(format!("{}/jobs/{}/cancel", self.api_url, remote_id))
            .timeout(self.request_timeout)
            .send()
            .await?;

        Self::check_status(response).await
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or an [`ApiError::ApiError`]
    /// carrying the status and body text.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    async fn check_status(response: reqwest::Response) -> Result<(), ApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn files(n: usize) -> Vec<LocalFile> {
        (0..n)
            .map(|i| LocalFile::new(format!("/tmp/doc{i}.md"), 1))
            .collect()
    }

    #[test]
    fn empty_batch_is_rejected() {
        let result = SubmissionRequest::new(IngestMode::Files, Vec::new(), JobSettings::default());
        assert_matches!(result, Err(SubmissionError::Invalid(_)));
    }

    #[test]
    fn oversized_batch_is_rejected() {
        let settings = JobSettings {
            batch_size: 2,
            ..Default::default()
        };
        let result = SubmissionRequest::new(IngestMode::Files, files(3), settings);
        assert_matches!(
            result,
            Err(SubmissionError::BatchTooLarge { count: 3, limit: 2 })
        );
    }

    #[test]
    fn archive_needs_exactly_one_file() {
        let result = SubmissionRequest::new(IngestMode::Archive, files(2), JobSettings::default());
        assert_matches!(result, Err(SubmissionError::Invalid(_)));
    }

    #[test]
    fn directory_parts_keep_relative_paths() {
        let file = LocalFile::new("/data/docs/guide/intro.md", 1)
            .with_relative_path("guide/intro.md");
        let settings = JobSettings::default();
        let request = SubmissionRequest::new(IngestMode::Directory, vec![file.clone()], settings)
            .unwrap();
        assert_eq!(request.part_name(&file), "guide/intro.md");

        let flat = JobSettings {
            preserve_structure: false,
            ..Default::default()
        };
        let request = SubmissionRequest::new(IngestMode::Directory, vec![file.clone()], flat)
            .unwrap();
        assert_eq!(request.part_name(&file), "intro.md");
    }

    #[tokio::test]
    async fn missing_file_fails_to_build_form() {
        let request = SubmissionRequest::new(
            IngestMode::Files,
            vec![LocalFile::new("/nonexistent/kbingest/file.md", 1)],
            JobSettings::default(),
        )
        .unwrap();
        assert_matches!(request.into_form().await, Err(SubmissionError::Read { .. }));
    }

    #[test]
    fn not_found_detection() {
        let err = ApiError::ApiError {
            status: 404,
            body: "{}".into(),
        };
        assert!(err.is_not_found());
    }
}
