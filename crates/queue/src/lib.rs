//! Upload job queue and progress-feed orchestration.
//!
//! Provides:
//! - [`manager`] - the [`manager::QueueManager`] and its processing loop.
//! - [`feed`] - per-job progress follower (live stream, polling fallback).
//! - [`reconciler`] - adoption of backend jobs already in flight.
//! - [`events`] - queue events broadcast to the UI shell.
//! - [`config`] - environment-driven configuration.

pub mod config;
pub mod events;
pub mod feed;
pub mod manager;
pub mod reconciler;
