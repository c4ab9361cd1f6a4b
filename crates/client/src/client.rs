//! Live-feed client for ingestion jobs.
//!
//! [`FeedClient`] opens `GET /jobs/{id}/stream` and turns the
//! `text/event-stream` body into a [`FeedStream`] of typed
//! [`FeedEvent`]s. The stream ends when the backend closes the
//! connection; there is no reconnect, callers fall back to polling.

use std::collections::VecDeque;
use std::fmt::Display;

use futures::stream::{BoxStream, Stream, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};

use crate::messages::{parse_message, FeedEvent};
use crate::sse::EventStreamDecoder;

/// Events from one job's live feed, in arrival order.
pub type FeedStream = BoxStream<'static, Result<FeedEvent, FeedError>>;

/// Errors opening or reading a live feed.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Could not establish the connection.
    #[error("Feed connection failed: {0}")]
    Connection(String),

    /// The backend does not offer a live feed for this job.
    #[error("Live feed unavailable: {0}")]
    Unavailable(String),

    /// The connection broke after it was established.
    #[error("Feed stream error: {0}")]
    Stream(String),
}

/// Connection settings for the live feed of one backend.
#[derive(Clone)]
pub struct FeedClient {
    client: reqwest::Client,
    api_url: String,
}

impl FeedClient {
    /// * `api_url` - Base HTTP URL, e.g. `http://localhost:8000`.
    pub fn new(api_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Reuse an existing [`reqwest::Client`]. It must not carry a total
    /// request timeout or long-lived feeds will be cut off.
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self { client, api_url }
    }

    pub fn feed_url(&self, remote_id: &str) -> String {
        format!("{}/jobs/{}/stream", self.api_url, remote_id)
    }

    /// Open the live feed of `remote_id`.
    pub async fn connect(&self, remote_id: &str) -> Result<FeedStream, FeedError> {
        let url = self.feed_url(remote_id);
        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| FeedError::Connection(format!("Failed to connect to {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Unavailable(format!("{url} returned {status}")));
        }
        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));
        if !is_event_stream {
            return Err(FeedError::Unavailable(format!(
                "{url} did not answer with an event stream"
            )));
        }

        tracing::debug!(remote_id, "Live feed connected");
        Ok(decode_events(response.bytes_stream()))
    }
}

/// Decode a byte stream into feed events.
///
/// Frames that are not valid feed events are logged and skipped. A
/// transport error is yielded once and ends the stream.
pub fn decode_events<S, B, E>(bytes: S) -> FeedStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    struct State<S> {
        bytes: std::pin::Pin<Box<S>>,
        decoder: EventStreamDecoder,
        ready: VecDeque<FeedEvent>,
        done: bool,
    }

    let state = State {
        bytes: Box::pin(bytes),
        decoder: EventStreamDecoder::new(),
        ready: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    for frame in state.decoder.push(chunk.as_ref()) {
                        match parse_message(&frame.data) {
                            Ok(event) => state.ready.push_back(event),
                            Err(e) => {
                                tracing::warn!(
                                    error = %e,
                                    data = %frame.data,
                                    "Unrecognized feed frame",
                                );
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(FeedError::Stream(e.to_string())), state));
                }
                None => return None,
            }
        }
    })
    .boxed()
}
