//! Incremental movement downloader

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    config::FailurePolicy,
    errors::RecorderError,
    models::{DownloadOutcome, StudyId},
    movebank::{parse_movement_path, ApiToken, TrackingSource},
    store::{PathStore, StudyStore},
};

/// What a single download cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No pending study
    Idle,
    /// Points were stored for the study
    Stored { study_id: StudyId, points: usize },
    /// The study had no usable data (error page or zero rows)
    Empty { study_id: StudyId },
    /// Fetching or storing failed; `marked` tells whether the study was
    /// flagged downloaded anyway
    Failed { study_id: StudyId, marked: bool },
}

/// Downloads the movement path of one pending study per cycle
///
/// Cycles must not overlap; callers run them one after another.
///
/// Under [`FailurePolicy::RetryLater`] a failed study is deferred: it is
/// not picked again until every other pending study has had a turn.
pub struct Downloader {
    studies: Arc<StudyStore>,
    paths: Arc<PathStore>,
    policy: FailurePolicy,
    deferred: Mutex<BTreeSet<StudyId>>,
}

impl Downloader {
    pub fn new(studies: Arc<StudyStore>, paths: Arc<PathStore>, policy: FailurePolicy) -> Self {
        Self {
            studies,
            paths,
            policy,
            deferred: Mutex::new(BTreeSet::new()),
        }
    }

    /// Download one pending study
    ///
    /// Per-study fetch, parse and store failures are logged and reported in
    /// the outcome; only failing to record the download status is an error.
    pub async fn run_one_cycle<S: TrackingSource>(
        &self,
        source: &S,
        token: &ApiToken,
    ) -> Result<CycleOutcome, RecorderError> {
        let Some(study_id) = self.next_study().await else {
            debug!("No pending studies to download");
            return Ok(CycleOutcome::Idle);
        };

        info!(%study_id, "Downloading movement path");

        match self.download(source, token, study_id).await {
            Ok(0) => Ok(CycleOutcome::Empty { study_id }),
            Ok(points) => Ok(CycleOutcome::Stored { study_id, points }),
            Err(e) => {
                warn!(%study_id, error = %e, "Movement download failed");
                let marked = match self.policy {
                    FailurePolicy::MarkAttempted => {
                        self.studies
                            .mark_downloaded(study_id, DownloadOutcome::Empty)
                            .await?;
                        true
                    }
                    FailurePolicy::RetryLater => {
                        self.deferred.lock().await.insert(study_id);
                        false
                    }
                };
                Ok(CycleOutcome::Failed { study_id, marked })
            }
        }
    }

    /// Lowest pending id not deferred; once only deferred studies remain,
    /// the deferral round starts over
    async fn next_study(&self) -> Option<StudyId> {
        let mut deferred = self.deferred.lock().await;
        if let Some(study_id) = self.studies.next_pending_except(&deferred).await {
            return Some(study_id);
        }

        if deferred.is_empty() {
            return None;
        }
        debug!(count = deferred.len(), "Retrying deferred studies");
        deferred.clear();
        self.studies.next_pending().await
    }

    /// Fetch, parse and commit one study; returns the number of points
    async fn download<S: TrackingSource>(
        &self,
        source: &S,
        token: &ApiToken,
        study_id: StudyId,
    ) -> Result<usize, RecorderError> {
        let points = match source.fetch_movement_path(token, study_id).await? {
            Some(payload) => parse_movement_path(&payload)?,
            None => Vec::new(),
        };

        self.paths
            .record_download(&self.studies, study_id, &points)
            .await?;
        Ok(points.len())
    }
}
