//! `kbingest` -- upload files to the document ingestion backend and
//! follow their progress.
//!
//! ```text
//! kbingest [PATH]...
//! ```
//!
//! Directories are uploaded as trees, `.zip` files as archives, anything
//! else as loose files. Jobs still running on the backend from an earlier
//! session are picked up first. Exits once every job has finished; the
//! exit code is non-zero if any job failed.
//!
//! Configuration is read from the environment (see
//! [`QueueConfig::from_env`]).

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use kbingest_client::backend::{HttpBackend, IngestBackend};
use kbingest_core::files::{scan_directory, IngestMode, LocalFile, MAX_SCAN_FILES};
use kbingest_queue::config::QueueConfig;
use kbingest_queue::events::QueueEvent;
use kbingest_queue::manager::{QueueError, QueueManager};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Files, directories or `.zip` archives to upload. With none given,
    /// only jobs still running on the backend are followed.
    #[arg(value_parser = existing_path)]
    paths: Vec<PathBuf>,
}

fn existing_path(raw: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(raw);
    if path.exists() {
        Ok(path)
    } else {
        Err(format!("{raw} does not exist"))
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "kbingest=info,kbingest_queue=info,kbingest_client=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = QueueConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(2);
    });

    tracing::info!(
        api_url = %config.api_url,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        inputs = args.paths.len(),
        "Starting kbingest",
    );

    let backend: Arc<dyn IngestBackend> =
        Arc::new(HttpBackend::new(config.api_url.clone(), config.request_timeout));
    let manager = QueueManager::new(config, backend);
    tokio::spawn(log_events(manager.subscribe()));

    match manager.reconcile_on_startup().await {
        Ok(0) => {}
        Ok(adopted) => tracing::info!(adopted, "Resumed jobs already running on the backend"),
        Err(e) => tracing::warn!(error = %e, "Could not reconcile with the backend"),
    }

    if let Err(e) = enqueue_paths(&manager, &args.paths).await {
        tracing::error!(error = %e, "Failed to enqueue inputs");
        std::process::exit(2);
    }

    manager.resume_processing().await;

    tokio::select! {
        _ = manager.wait_until_settled() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted; jobs already submitted keep running on the backend");
            manager.shutdown().await;
        }
    }

    let summary = manager.summary().await;
    tracing::info!(
        completed = summary.completed,
        failed = summary.failed,
        cancelled = summary.cancelled,
        unfinished = summary.queued + summary.processing + summary.paused,
        "Done",
    );
    for job in manager.jobs().await {
        for skipped in &job.skipped {
            tracing::info!(file = %skipped.name, reason = %skipped.reason, "Skipped");
        }
        for error in &job.errors {
            tracing::warn!(job_id = %job.id, error = %error, "Job error");
        }
    }

    if summary.failed > 0 {
        std::process::exit(1);
    }
}

/// Turn command-line paths into queued jobs. Loose files are collected
/// into shared batches; each directory and archive gets its own.
async fn enqueue_paths(manager: &QueueManager, paths: &[PathBuf]) -> Result<(), QueueError> {
    let settings = manager.config().default_settings();
    let mut loose: Vec<LocalFile> = Vec::new();

    for path in paths {
        match IngestMode::detect(path) {
            IngestMode::Directory => {
                let files = scan_directory(path, MAX_SCAN_FILES)?;
                tracing::info!(path = %path.display(), files = files.len(), "Scanned directory");
                manager
                    .enqueue_batches(IngestMode::Directory, files, settings.clone())
                    .await?;
            }
            IngestMode::Archive => {
                let bundle = LocalFile::from_path(path)?;
                manager
                    .add_to_queue(IngestMode::Archive, vec![bundle], settings.clone())
                    .await?;
            }
            IngestMode::Files => loose.push(LocalFile::from_path(path)?),
        }
    }

    if !loose.is_empty() {
        manager
            .enqueue_batches(IngestMode::Files, loose, settings)
            .await?;
    }
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<QueueEvent>) {
    loop {
        match events.recv().await {
            Ok(QueueEvent::JobProgress {
                job_id,
                processed_files,
                total_files,
                percentage,
            }) => {
                tracing::info!(%job_id, processed_files, total_files, percentage, "Progress");
            }
            Ok(QueueEvent::LoopHalted { reason }) => {
                tracing::error!(%reason, "Upload queue stopped unexpectedly");
            }
            Ok(event) => tracing::debug!(?event, "Queue event"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Event log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
