//! In-memory mirrors of the `studies` and `movement_data` tables
//!
//! Reads are served from memory. Every mutation is committed to the
//! database first and applied to memory only after the commit succeeds;
//! write guards are never held across a database call. Mutations come from
//! a single writer, the downloader task.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{
    database::Database,
    errors::RecorderError,
    models::{DownloadOutcome, DownloadStatus, MovementPoint, PathPoint, Study, StudyId},
};

/// Known studies, keyed and iterated by id
pub struct StudyStore {
    db: Database,
    studies: RwLock<BTreeMap<StudyId, Study>>,
}

impl StudyStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            studies: RwLock::new(BTreeMap::new()),
        }
    }

    /// Populate the mirror from the database
    pub async fn load_all(&self) -> Result<Vec<Study>, RecorderError> {
        let loaded = self.db.fetch_studies().await?;

        let mut studies = self.studies.write().await;
        studies.clear();
        studies.extend(loaded.iter().map(|study| (study.id, study.clone())));

        info!(count = loaded.len(), "Loaded studies from database");
        Ok(loaded)
    }

    /// Insert candidates whose id is not yet known, as pending
    ///
    /// Known studies are left untouched. All inserts are committed as one
    /// batch; returns the ids that were added.
    pub async fn upsert_if_absent(
        &self,
        candidates: Vec<Study>,
    ) -> Result<Vec<StudyId>, RecorderError> {
        let fresh: Vec<Study> = {
            let studies = self.studies.read().await;
            let mut fresh: Vec<Study> = Vec::new();
            for mut candidate in candidates {
                if studies.contains_key(&candidate.id)
                    || fresh.iter().any(|s| s.id == candidate.id)
                {
                    continue;
                }
                candidate.status = DownloadStatus::Pending;
                fresh.push(candidate);
            }
            fresh
        };

        if fresh.is_empty() {
            debug!("No new studies to insert");
            return Ok(Vec::new());
        }

        self.db.insert_studies(&fresh).await?;

        let ids: Vec<StudyId> = fresh.iter().map(|study| study.id).collect();
        let mut studies = self.studies.write().await;
        for study in fresh {
            studies.entry(study.id).or_insert(study);
        }

        info!(count = ids.len(), "Inserted new studies");
        Ok(ids)
    }

    /// Flag a study as downloaded; repeating the call only updates the outcome
    pub async fn mark_downloaded(
        &self,
        study_id: StudyId,
        outcome: DownloadOutcome,
    ) -> Result<(), RecorderError> {
        if !self.studies.read().await.contains_key(&study_id) {
            return Err(RecorderError::UnknownStudy(study_id));
        }

        if !self.db.set_downloaded(study_id, outcome).await? {
            return Err(RecorderError::UnknownStudy(study_id));
        }
        self.apply_downloaded(study_id, outcome).await;

        debug!(%study_id, ?outcome, "Marked study downloaded");
        Ok(())
    }

    async fn apply_downloaded(&self, study_id: StudyId, outcome: DownloadOutcome) {
        if let Some(study) = self.studies.write().await.get_mut(&study_id) {
            study.status = DownloadStatus::Downloaded(outcome);
        }
    }

    /// First pending study in id order
    ///
    /// This is a linear scan over all studies, not an index lookup.
    pub async fn next_pending(&self) -> Option<StudyId> {
        self.next_pending_except(&BTreeSet::new()).await
    }

    /// First pending study in id order that is not in `deferred`
    pub async fn next_pending_except(&self, deferred: &BTreeSet<StudyId>) -> Option<StudyId> {
        self.studies
            .read()
            .await
            .values()
            .find(|study| !study.downloaded() && !deferred.contains(&study.id))
            .map(|study| study.id)
    }

    pub async fn downloaded_ids(&self) -> Vec<StudyId> {
        self.studies
            .read()
            .await
            .values()
            .filter(|study| study.downloaded())
            .map(|study| study.id)
            .collect()
    }

    pub async fn get(&self, study_id: StudyId) -> Option<Study> {
        self.studies.read().await.get(&study_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.studies.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.studies.read().await.is_empty()
    }
}

/// Stored movement paths, per study
pub struct PathStore {
    db: Database,
    paths: RwLock<HashMap<StudyId, Vec<MovementPoint>>>,
}

impl PathStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            paths: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild the per-study sequences from the database
    ///
    /// Returns the total number of points loaded.
    pub async fn load_all(&self) -> Result<usize, RecorderError> {
        let rows = self.db.fetch_movement().await?;
        let count = rows.len();

        let mut paths = self.paths.write().await;
        paths.clear();
        for (study_id, point) in rows {
            paths.entry(study_id).or_default().push(point);
        }

        info!(
            points = count,
            studies = paths.len(),
            "Loaded movement data from database"
        );
        Ok(count)
    }

    /// Persist a study's points as one batch and append them in memory
    ///
    /// A second call for the same study appends rather than replaces.
    pub async fn append_path(
        &self,
        study_id: StudyId,
        points: &[PathPoint],
    ) -> Result<usize, RecorderError> {
        if points.is_empty() {
            return Ok(0);
        }

        let stored = self.db.insert_movement(study_id, points).await?;
        let count = self.apply_points(study_id, stored).await;

        info!(%study_id, points = count, "Stored movement path");
        Ok(count)
    }

    /// Persist a downloaded path and flag its study downloaded, atomically
    ///
    /// The outcome is `WithData` when there are points and `Empty`
    /// otherwise. Points become visible before the study is listed as
    /// downloaded.
    pub async fn record_download(
        &self,
        studies: &StudyStore,
        study_id: StudyId,
        points: &[PathPoint],
    ) -> Result<DownloadOutcome, RecorderError> {
        if points.is_empty() {
            studies
                .mark_downloaded(study_id, DownloadOutcome::Empty)
                .await?;
            return Ok(DownloadOutcome::Empty);
        }

        if studies.get(study_id).await.is_none() {
            return Err(RecorderError::UnknownStudy(study_id));
        }

        let outcome = DownloadOutcome::WithData;
        let stored = self
            .db
            .store_path_and_mark(study_id, points, outcome)
            .await?;
        let count = self.apply_points(study_id, stored).await;
        studies.apply_downloaded(study_id, outcome).await;

        info!(%study_id, points = count, "Stored movement path");
        Ok(outcome)
    }

    async fn apply_points(&self, study_id: StudyId, stored: Vec<MovementPoint>) -> usize {
        let count = stored.len();
        self.paths
            .write()
            .await
            .entry(study_id)
            .or_default()
            .extend(stored);
        count
    }

    /// Stored points for a study; empty for unknown ids
    pub async fn points_for(&self, study_id: StudyId) -> Vec<MovementPoint> {
        self.paths
            .read()
            .await
            .get(&study_id)
            .cloned()
            .unwrap_or_default()
    }
}
