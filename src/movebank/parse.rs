//! Decoding of Movebank direct-read CSV payloads
//!
//! Rows are decoded into raw records first and converted into typed
//! models afterwards. Any bad row fails the whole payload.

use serde::Deserialize;

use crate::{
    errors::RecorderError,
    models::{parse_timestamp, PathPoint, Study, StudyId},
};

/// One row of `entity_type=study`
#[derive(Debug, Deserialize)]
struct StudyRecord {
    id: i64,
    name: String,
    timestamp_last_deployed_location: Option<String>,
    number_of_individuals: Option<i64>,
    contact_person_name: Option<String>,
    principal_investigator_name: Option<String>,
}

/// One row of `entity_type=event`
#[derive(Debug, Deserialize)]
struct EventRecord {
    timestamp: Option<String>,
    location_long: Option<f64>,
    location_lat: Option<f64>,
}

/// Whether a payload is an HTML page rather than CSV
///
/// Movebank answers some requests (e.g. studies without download
/// permission) with a 200 and an HTML explanation.
pub fn is_error_page(payload: &str) -> bool {
    payload.trim_start().starts_with('<')
        || payload
            .as_bytes()
            .windows(3)
            .any(|window| window.eq_ignore_ascii_case(b"<p>"))
}

fn reader(payload: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(payload.as_bytes())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

fn coordinate(value: Option<f64>, name: &str, row: usize) -> Result<Option<f64>, RecorderError> {
    match value {
        Some(v) if !v.is_finite() => Err(RecorderError::Parse(format!(
            "row {}: {} is not a finite number",
            row, name
        ))),
        other => Ok(other),
    }
}

impl TryFrom<StudyRecord> for Study {
    type Error = RecorderError;

    fn try_from(record: StudyRecord) -> Result<Self, Self::Error> {
        if record.name.is_empty() {
            return Err(RecorderError::Parse(format!(
                "study {} has no name",
                record.id
            )));
        }

        let last_deployed_time = non_empty(record.timestamp_last_deployed_location)
            .map(|ts| parse_timestamp(&ts).map(|dt| dt.timestamp()))
            .transpose()?;

        let mut study = Study::new(StudyId::from(record.id), record.name);
        study.last_deployed_time = last_deployed_time;
        study.number_of_animals = record.number_of_individuals;
        study.contact_name = non_empty(record.contact_person_name);
        study.principal_investigator = non_empty(record.principal_investigator_name);
        Ok(study)
    }
}

/// Decode a study list payload
pub fn parse_study_list(payload: &str) -> Result<Vec<Study>, RecorderError> {
    reader(payload)
        .deserialize::<StudyRecord>()
        .map(|record| Study::try_from(record?))
        .collect()
}

/// Decode a movement path payload, keeping row order
pub fn parse_movement_path(payload: &str) -> Result<Vec<PathPoint>, RecorderError> {
    let mut points = Vec::new();

    for (index, record) in reader(payload).deserialize::<EventRecord>().enumerate() {
        let record = record?;
        let row = index + 1;

        let timestamp = non_empty(record.timestamp)
            .ok_or_else(|| RecorderError::Parse(format!("row {}: missing timestamp", row)))?;

        points.push(PathPoint {
            epoch_time: parse_timestamp(&timestamp)?.timestamp_millis(),
            latitude: coordinate(record.location_lat, "location_lat", row)?,
            longitude: coordinate(record.location_long, "location_long", row)?,
        });
    }

    Ok(points)
}
