//! The seam between the queue and the ingestion service.
//!
//! [`IngestBackend`] is everything the queue manager and reconciler need
//! from the backend. [`HttpBackend`] is the production implementation;
//! tests substitute an in-memory one.

use std::time::Duration;

use async_trait::async_trait;
use kbingest_core::types::RemoteJobId;

use crate::api::{ApiError, IngestApi, SubmissionError, SubmissionRequest};
use crate::client::{FeedClient, FeedError, FeedStream};
use crate::messages::BackendJob;

#[async_trait]
pub trait IngestBackend: Send + Sync {
    /// Upload one batch and return the backend job id.
    async fn submit(&self, request: SubmissionRequest) -> Result<RemoteJobId, SubmissionError>;

    /// All jobs the backend currently knows about.
    async fn list_jobs(&self) -> Result<Vec<BackendJob>, ApiError>;

    async fn get_job(&self, remote_id: &str) -> Result<BackendJob, ApiError>;

    async fn cancel_job(&self, remote_id: &str) -> Result<(), ApiError>;

    /// Open the live feed of one job.
    async fn open_feed(&self, remote_id: &str) -> Result<FeedStream, FeedError>;
}

/// [`IngestBackend`] over HTTP, sharing one connection pool between the
/// REST client and the live feed.
#[derive(Clone)]
pub struct HttpBackend {
    api: IngestApi,
    feed: FeedClient,
}

impl HttpBackend {
    pub fn new(api_url: String, request_timeout: Duration) -> Self {
        let client = reqwest::Client::new();
        Self {
            api: IngestApi::with_client(client.clone(), api_url.clone(), request_timeout),
            feed: FeedClient::with_client(client, api_url),
        }
    }

    pub fn api(&self) -> &IngestApi {
        &self.api
    }
}

#[async_trait]
impl IngestBackend for HttpBackend {
    async fn submit(&self, request: SubmissionRequest) -> Result<RemoteJobId, SubmissionError> {
        let response = self.api.submit(request).await?;
        tracing::info!(
            remote_id = %response.job_id,
            message = response.message.as_deref().unwrap_or(""),
            "Batch accepted by backend",
        );
        Ok(response.job_id)
    }

    async fn list_jobs(&self) -> Result<Vec<BackendJob>, ApiError> {
        self.api.list_jobs().await
    }

    async fn get_job(&self, remote_id: &str) -> Result<BackendJob, ApiError> {
        self.api.get_job(remote_id).await
    }

    async fn cancel_job(&self, remote_id: &str) -> Result<(), ApiError> {
        self.api.cancel_job(remote_id).await
    }

    async fn open_feed(&self, remote_id: &str) -> Result<FeedStream, FeedError> {
        self.feed.connect(remote_id).await
    }
}
