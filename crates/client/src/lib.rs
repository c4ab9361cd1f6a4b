//! HTTP client for the document ingestion backend.
//!
//! Provides:
//! - [`api`] - REST API client (submission, listing, status, cancel).
//! - [`client`] - live-feed connection over `text/event-stream`.
//! - [`messages`] - typed backend payloads and feed events.
//! - [`sse`] - incremental event-stream frame decoder.
//! - [`backend`] - the [`backend::IngestBackend`] trait the queue talks to.

pub mod api;
pub mod backend;
pub mod client;
pub mod messages;
pub mod sse;
