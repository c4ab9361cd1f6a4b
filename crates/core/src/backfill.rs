//! Approximate per-file status reconstruction from aggregate counters.
//!
//! The ingestion backend reports only job-level counters (`processed`,
//! `successful`, `failed`), never which individual files succeeded. When a
//! per-file view is needed (after a restart, or while merging feed
//! updates) the statuses are back-filled positionally:
//!
//! - entries with index `< successful` are [`FileStatus::Completed`],
//! - entries from `successful` up to `processed` are [`FileStatus::Failed`],
//! - the remainder stay [`FileStatus::Pending`].
//!
//! This is an approximation. The real backend processes files
//! concurrently and out of order, so the entry marked `Failed` here is
//! not necessarily the file that actually failed. Only the counts are
//! trustworthy.

use crate::job::FileStatus;

/// Back-fill `len` per-file statuses from aggregate counters.
///
/// Counters larger than `len` are clamped, and `successful` is clamped to
/// `processed`, so the result always has exactly `len` entries.
pub fn backfill_file_statuses(len: usize, successful: u32, processed: u32) -> Vec<FileStatus> {
    let processed = (processed as usize).min(len);
    let successful = (successful as usize).min(processed);

    (0..len)
        .map(|index| {
            if index < successful {
                FileStatus::Completed
            } else if index < processed {
                FileStatus::Failed
            } else {
                FileStatus::Pending
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_by_counters() {
        let statuses = backfill_file_statuses(5, 2, 3);
        assert_eq!(
            statuses,
            vec![
                FileStatus::Completed,
                FileStatus::Completed,
                FileStatus::Failed,
                FileStatus::Pending,
                FileStatus::Pending,
            ]
        );
    }

    #[test]
    fn nothing_processed_is_all_pending() {
        let statuses = backfill_file_statuses(3, 0, 0);
        assert!(statuses.iter().all(|s| *s == FileStatus::Pending));
    }

    #[test]
    fn all_processed_without_success_is_all_failed() {
        let statuses = backfill_file_statuses(4, 0, 4);
        assert!(statuses.iter().all(|s| *s == FileStatus::Failed));
    }

    #[test]
    fn counters_larger_than_manifest_are_clamped() {
        let statuses = backfill_file_statuses(2, 7, 9);
        assert_eq!(statuses, vec![FileStatus::Completed, FileStatus::Completed]);
    }

    #[test]
    fn successful_above_processed_is_clamped() {
        let statuses = backfill_file_statuses(3, 3, 1);
        assert_eq!(
            statuses,
            vec![FileStatus::Completed, FileStatus::Pending, FileStatus::Pending]
        );
    }

    #[test]
    fn empty_manifest() {
        assert!(backfill_file_statuses(0, 1, 1).is_empty());
    }
}
