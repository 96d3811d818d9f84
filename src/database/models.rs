// src/database/models.rs
use super::types::{download_status, StoredOutcome};
use crate::models::{MovementPoint, Study, StudyId};

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct StudyRow {
    id: i64,
    species: String,
    last_deployed_time: Option<i64>,
    number_of_animals: Option<i64>,
    contact_name: Option<String>,
    principal_investigator: Option<String>,
    downloaded: Option<bool>,
    download_outcome: Option<StoredOutcome>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MovementRow {
    id: i64,
    study_id: i64,
    epoch_time: i64,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl From<StudyRow> for Study {
    fn from(row: StudyRow) -> Self {
        Study {
            id: StudyId::from(row.id),
            species: row.species,
            last_deployed_time: row.last_deployed_time,
            number_of_animals: row.number_of_animals,
            contact_name: row.contact_name,
            principal_investigator: row.principal_investigator,
            status: download_status(row.downloaded.unwrap_or(false), row.download_outcome),
        }
    }
}

impl MovementRow {
    pub(crate) fn into_parts(self) -> (StudyId, MovementPoint) {
        (
            StudyId::from(self.study_id),
            MovementPoint {
                id: self.id,
                epoch_time: self.epoch_time,
                latitude: self.latitude,
                longitude: self.longitude,
            },
        )
    }
}
