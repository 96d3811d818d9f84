// src/database.rs
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use tracing::{debug, info};

use crate::{
    config::DatabaseConfig,
    errors::RecorderError,
    models::{DownloadOutcome, MovementPoint, PathPoint, Study, StudyId},
};

mod models;
mod types;

use models::{MovementRow, StudyRow};
use types::StoredOutcome;

/// Rows per multi-row movement insert
///
/// Each row binds four parameters; SQLite allows at most 32766 per statement.
const MOVEMENT_ROWS_PER_INSERT: usize = 8000;

/// SQLite storage for studies and movement data
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Wrap an existing pool and apply pending migrations
    pub async fn new(pool: SqlitePool) -> Result<Self, RecorderError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Open (creating if missing) the database at `url`
    pub async fn from_url(url: &str, max_connections: u32) -> Result<Self, RecorderError> {
        info!("Opening database at {}", url);
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // An in-memory database lives only as long as its connection
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::new(pool).await
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self, RecorderError> {
        Self::from_url(&config.url, config.max_connections).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// All studies, ordered by id
    pub async fn fetch_studies(&self) -> Result<Vec<Study>, RecorderError> {
        let rows: Vec<StudyRow> = sqlx::query_as(
            "SELECT id, species, last_deployed_time, number_of_animals,
                    contact_name, principal_investigator, downloaded, download_outcome
             FROM studies
             ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Study::from).collect())
    }

    /// Insert studies in a single transaction
    ///
    /// Ids already present in the table are skipped, never overwritten.
    /// Every study is stored as pending.
    pub async fn insert_studies(&self, studies: &[Study]) -> Result<u64, RecorderError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for study in studies {
            inserted += sqlx::query(
                "INSERT INTO studies (
                    id, species, last_deployed_time, number_of_animals,
                    contact_name, principal_investigator, downloaded
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)
                ON CONFLICT (id) DO NOTHING",
            )
            .bind(study.id)
            .bind(&study.species)
            .bind(study.last_deployed_time)
            .bind(study.number_of_animals)
            .bind(&study.contact_name)
            .bind(&study.principal_investigator)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;
        debug!(inserted, "Committed study batch");
        Ok(inserted)
    }

    /// Record the outcome of a movement download
    ///
    /// Returns false when no study with that id exists.
    pub async fn set_downloaded(
        &self,
        study_id: StudyId,
        outcome: DownloadOutcome,
    ) -> Result<bool, RecorderError> {
        let result = sqlx::query(
            "UPDATE studies SET downloaded = 1, download_outcome = ?1 WHERE id = ?2",
        )
        .bind(StoredOutcome::from(outcome))
        .bind(study_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// All movement points, ordered by insertion
    pub async fn fetch_movement(&self) -> Result<Vec<(StudyId, MovementPoint)>, RecorderError> {
        let rows: Vec<MovementRow> = sqlx::query_as(
            "SELECT id, study_id, epoch_time, latitude, longitude
             FROM movement_data
             WHERE study_id IS NOT NULL
             ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(MovementRow::into_parts).collect())
    }

    /// Insert a study's movement path in a single transaction
    ///
    /// Returns the stored points with their assigned ids, in input order.
    pub async fn insert_movement(
        &self,
        study_id: StudyId,
        points: &[PathPoint],
    ) -> Result<Vec<MovementPoint>, RecorderError> {
        let mut tx = self.pool.begin().await?;
        let stored = insert_points(&mut *tx, study_id, points).await?;
        tx.commit().await?;
        Ok(stored)
    }

    /// Insert a study's movement path and flag the study downloaded, in
    /// one transaction
    ///
    /// Either both the points and the status are committed or neither is.
    pub async fn store_path_and_mark(
        &self,
        study_id: StudyId,
        points: &[PathPoint],
        outcome: DownloadOutcome,
    ) -> Result<Vec<MovementPoint>, RecorderError> {
        let mut tx = self.pool.begin().await?;
        let stored = insert_points(&mut *tx, study_id, points).await?;

        let updated = sqlx::query(
            "UPDATE studies SET downloaded = 1, download_outcome = ?1 WHERE id = ?2",
        )
        .bind(StoredOutcome::from(outcome))
        .bind(study_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Err(RecorderError::UnknownStudy(study_id));
        }

        tx.commit().await?;
        debug!(%study_id, points = stored.len(), "Committed movement path");
        Ok(stored)
    }
}

/// Multi-row inserts of movement points, chunked under the bind limit
///
/// Ids are handed out in ascending order within the statement, so sorted
/// returned ids line up with the input order.
async fn insert_points(
    conn: &mut SqliteConnection,
    study_id: StudyId,
    points: &[PathPoint],
) -> Result<Vec<MovementPoint>, RecorderError> {
    let mut stored = Vec::with_capacity(points.len());

    for chunk in points.chunks(MOVEMENT_ROWS_PER_INSERT) {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO movement_data (study_id, epoch_time, latitude, longitude) ",
        );
        builder.push_values(chunk, |mut row, point| {
            row.push_bind(study_id)
                .push_bind(point.epoch_time)
                .push_bind(point.latitude)
                .push_bind(point.longitude);
        });
        builder.push(" RETURNING id");

        let mut ids: Vec<i64> = builder
            .build_query_scalar()
            .fetch_all(&mut *conn)
            .await?;
        ids.sort_unstable();

        stored.extend(
            ids.into_iter()
                .zip(chunk)
                .map(|(id, point)| MovementPoint::from_path_point(id, point)),
        );
    }

    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DownloadStatus;

    async fn memory_db() -> Database {
        Database::from_url("sqlite::memory:", 1).await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_studies_skips_existing() -> Result<(), RecorderError> {
        let db = memory_db().await;

        let mut osprey = Study::new(1, "Osprey");
        osprey.number_of_animals = Some(4);
        assert_eq!(db.insert_studies(&[osprey]).await?, 1);

        let renamed = Study::new(1, "Renamed");
        let stork = Study::new(2, "White stork");
        assert_eq!(db.insert_studies(&[renamed, stork]).await?, 1);

        let studies = db.fetch_studies().await?;
        assert_eq!(studies.len(), 2);
        assert_eq!(studies[0].species, "Osprey");
        assert_eq!(studies[0].number_of_animals, Some(4));
        assert_eq!(studies[1].species, "White stork");
        Ok(())
    }

    #[tokio::test]
    async fn test_insert_studies_stores_pending() -> Result<(), RecorderError> {
        let db = memory_db().await;

        let mut study = Study::new(7, "Osprey");
        study.status = DownloadStatus::Downloaded(DownloadOutcome::WithData);
        db.insert_studies(&[study]).await?;

        let studies = db.fetch_studies().await?;
        assert_eq!(studies[0].status, DownloadStatus::Pending);
        Ok(())
    }

    #[tokio::test]
    async fn test_set_downloaded() -> Result<(), RecorderError> {
        let db = memory_db().await;
        db.insert_studies(&[Study::new(1, "Osprey")]).await?;

        assert!(db.set_downloaded(1.into(), DownloadOutcome::WithData).await?);
        assert!(!db.set_downloaded(99.into(), DownloadOutcome::Empty).await?);

        let studies = db.fetch_studies().await?;
        assert_eq!(
            studies[0].status,
            DownloadStatus::Downloaded(DownloadOutcome::WithData)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_insert_movement_requires_study() {
        let db = memory_db().await;
        let point = PathPoint {
            epoch_time: 1218311880000,
            latitude: Some(52.1),
            longitude: Some(8.6),
        };

        let result = db.insert_movement(42.into(), &[point]).await;
        assert!(matches!(result, Err(RecorderError::Persistence(_))));

        let stored = db.fetch_movement().await.unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn test_insert_movement_assigns_ids() -> Result<(), RecorderError> {
        let db = memory_db().await;
        db.insert_studies(&[Study::new(1, "Osprey")]).await?;

        let points = [
            PathPoint {
                epoch_time: 1000,
                latitude: Some(52.1),
                longitude: Some(8.6),
            },
            PathPoint {
                epoch_time: 2000,
                latitude: None,
                longitude: None,
            },
        ];
        let stored = db.insert_movement(1.into(), &points).await?;
        assert_eq!(stored.len(), 2);
        assert!(stored[0].id < stored[1].id);

        let fetched = db.fetch_movement().await?;
        let fetched: Vec<_> = fetched.into_iter().map(|(_, point)| point).collect();
        assert_eq!(fetched, stored);
        Ok(())
    }

    #[tokio::test]
    async fn test_insert_movement_spans_chunks() -> Result<(), RecorderError> {
        let db = memory_db().await;
        db.insert_studies(&[Study::new(1, "Osprey")]).await?;

        let points: Vec<PathPoint> = (0..MOVEMENT_ROWS_PER_INSERT as i64 * 2 + 3)
            .map(|i| PathPoint {
                epoch_time: i * 1000,
                latitude: Some(60.0),
                longitude: None,
            })
            .collect();
        let stored = db.insert_movement(1.into(), &points).await?;

        assert_eq!(stored.len(), points.len());
        assert!(stored.windows(2).all(|w| w[0].id < w[1].id));
        assert!(stored
            .iter()
            .zip(&points)
            .all(|(stored, point)| stored.epoch_time == point.epoch_time));

        let fetched = db.fetch_movement().await?;
        assert_eq!(fetched.len(), points.len());
        assert_eq!(fetched.last().map(|(_, p)| p.id), stored.last().map(|p| p.id));
        Ok(())
    }

    #[tokio::test]
    async fn test_store_path_and_mark_commits_both() -> Result<(), RecorderError> {
        let db = memory_db().await;
        db.insert_studies(&[Study::new(1, "Osprey")]).await?;
        let point = PathPoint {
            epoch_time: 1000,
            latitude: Some(52.1),
            longitude: Some(8.6),
        };

        let stored = db
            .store_path_and_mark(1.into(), &[point], DownloadOutcome::WithData)
            .await?;

        assert_eq!(stored.len(), 1);
        assert_eq!(db.fetch_movement().await?.len(), 1);
        assert_eq!(
            db.fetch_studies().await?[0].status,
            DownloadStatus::Downloaded(DownloadOutcome::WithData)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_store_path_and_mark_unknown_study_stores_nothing() {
        let db = memory_db().await;
        let point = PathPoint {
            epoch_time: 1000,
            latitude: Some(52.1),
            longitude: Some(8.6),
        };

        // Foreign key rejects the points
        let result = db
            .store_path_and_mark(42.into(), &[point], DownloadOutcome::WithData)
            .await;
        assert!(result.is_err());

        // Update matches no row
        let result = db
            .store_path_and_mark(42.into(), &[], DownloadOutcome::Empty)
            .await;
        assert!(matches!(result, Err(RecorderError::UnknownStudy(_))));

        assert!(db.fetch_movement().await.unwrap().is_empty());
    }
}
