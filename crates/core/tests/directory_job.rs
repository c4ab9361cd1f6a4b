//! Integration test: a directory on disk becomes a job record that
//! follows backend progress to completion.

use std::fs;

use chrono::Utc;
use kbingest_core::files::{scan_directory, select_files, IngestMode, MAX_SCAN_FILES};
use kbingest_core::job::{
    FileStatus, JobRecord, JobSettings, JobStatus, RemoteCounters, RemoteSnapshot, RemoteStatus,
};

fn snapshot(status: RemoteStatus, processed: u32, successful: u32) -> RemoteSnapshot {
    RemoteSnapshot {
        status,
        counters: RemoteCounters {
            total_files: 2,
            processed_files: processed,
            successful_files: successful,
            failed_files: processed - successful,
            percentage: None,
        },
        file_list: Vec::new(),
        started_at: None,
        completed_at: None,
        errors: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Test: scanned tree keeps relative paths and drops ineligible files
// ---------------------------------------------------------------------------

#[test]
fn scanned_directory_runs_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("notes")).unwrap();
    fs::write(dir.path().join("readme.md"), "# hello").unwrap();
    fs::write(dir.path().join("notes/a.txt"), "a").unwrap();
    fs::write(dir.path().join("notes/.hidden.txt"), "h").unwrap();
    fs::write(dir.path().join("tool.exe"), [0u8; 4]).unwrap();

    let settings = JobSettings::default();
    let files = scan_directory(dir.path(), MAX_SCAN_FILES).unwrap();
    assert_eq!(files.len(), 4);

    let selection = select_files(files, &settings, IngestMode::Directory);
    let accepted: Vec<&str> = selection.accepted.iter().map(|f| f.display_name()).collect();
    assert_eq!(accepted, vec!["notes/a.txt", "readme.md"]);
    assert_eq!(selection.skipped.len(), 2);

    let mut job = JobRecord::new(
        IngestMode::Directory,
        selection.accepted,
        selection.skipped,
        settings,
        Utc::now(),
    );
    job.start(Utc::now()).unwrap();
    job.mark_submitted("upload_1".to_string()).unwrap();

    let outcome = job.apply_remote(&snapshot(RemoteStatus::Processing, 1, 1), Utc::now());
    assert_eq!(outcome.finished, None);
    assert_eq!(job.files[0].status, FileStatus::Completed);
    assert_eq!(job.files[1].status, FileStatus::Processing);

    let outcome = job.apply_remote(&snapshot(RemoteStatus::Completed, 2, 2), Utc::now());
    assert_eq!(outcome.finished, Some(JobStatus::Completed));
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.percentage, 100.0);
    assert!(job.timestamps.completed_at.is_some());

    // Reports after completion change nothing.
    assert!(job.apply_remote(&snapshot(RemoteStatus::Failed, 2, 0), Utc::now()).ignored);
    assert_eq!(job.status, JobStatus::Completed);
}
