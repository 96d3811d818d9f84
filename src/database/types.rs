// src/database/types.rs
use crate::models::{DownloadOutcome, DownloadStatus};

/// `studies.download_outcome` column value
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
pub(crate) enum StoredOutcome {
    Empty,
    WithData,
}

impl From<DownloadOutcome> for StoredOutcome {
    fn from(outcome: DownloadOutcome) -> Self {
        match outcome {
            DownloadOutcome::Empty => StoredOutcome::Empty,
            DownloadOutcome::WithData => StoredOutcome::WithData,
        }
    }
}

/// Rebuild the download status from the two persisted columns
///
/// Rows written before `download_outcome` existed have only the flag.
pub(crate) fn download_status(downloaded: bool, outcome: Option<StoredOutcome>) -> DownloadStatus {
    match (downloaded, outcome) {
        (false, _) => DownloadStatus::Pending,
        (true, Some(StoredOutcome::WithData)) => {
            DownloadStatus::Downloaded(DownloadOutcome::WithData)
        }
        (true, _) => DownloadStatus::Downloaded(DownloadOutcome::Empty),
    }
}
