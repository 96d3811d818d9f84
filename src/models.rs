//! Data models.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::RecorderError;

/// Movebank study identifier
///
/// Assigned by Movebank; unique across the local store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct StudyId(i64);

impl From<i64> for StudyId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl TryFrom<&str> for StudyId {
    type Error = RecorderError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value
            .trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|_| RecorderError::Parse(format!("invalid study id '{}'", value)))
    }
}

impl StudyId {
    /// Get the raw study id
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for StudyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of a movement download attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Attempted, but nothing was stored (error page, zero rows or failure)
    Empty,
    /// At least one movement point was stored
    WithData,
}

/// Download state of a study
///
/// The transition out of `Pending` is one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloadStatus {
    #[default]
    Pending,
    Downloaded(DownloadOutcome),
}

impl DownloadStatus {
    pub fn is_downloaded(&self) -> bool {
        matches!(self, DownloadStatus::Downloaded(_))
    }
}

/// Tracking study metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Study {
    pub id: StudyId,
    /// Study name as published on Movebank
    pub species: String,
    /// Last deployed location timestamp in seconds from Unix epoch
    pub last_deployed_time: Option<i64>,
    pub number_of_animals: Option<i64>,
    pub contact_name: Option<String>,
    pub principal_investigator: Option<String>,
    pub status: DownloadStatus,
}

impl Study {
    /// Create a pending study with no optional attributes
    pub fn new(id: impl Into<StudyId>, species: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            species: species.into(),
            last_deployed_time: None,
            number_of_animals: None,
            contact_name: None,
            principal_investigator: None,
            status: DownloadStatus::Pending,
        }
    }

    pub fn downloaded(&self) -> bool {
        self.status.is_downloaded()
    }
}

/// One GPS fix as decoded from a movement payload, before it is stored
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathPoint {
    /// Fix timestamp in milliseconds from Unix epoch
    pub epoch_time: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Stored movement point, as served to the browser map
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MovementPoint {
    pub id: i64,
    pub epoch_time: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl MovementPoint {
    pub fn from_path_point(id: i64, point: &PathPoint) -> Self {
        Self {
            id,
            epoch_time: point.epoch_time,
            latitude: point.latitude,
            longitude: point.longitude,
        }
    }
}

/// Parse a Movebank timestamp
///
/// Accepts `YYYY-MM-DD HH:MM:SS[.fff]` (UTC) or a plain integer, which is
/// taken as milliseconds from Unix epoch.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, RecorderError> {
    let value = value.trim();

    if let Ok(millis) = value.parse::<i64>() {
        return DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| RecorderError::Parse(format!("timestamp out of range: {}", value)));
    }

    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| RecorderError::Parse(format!("invalid timestamp '{}': {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn study_id_from_str() {
        assert_eq!(StudyId::try_from("2911040").unwrap(), StudyId::from(2911040));
        assert_eq!(StudyId::try_from(" 17 ").unwrap().value(), 17);
        assert!(StudyId::try_from("abc").is_err());
        assert!(StudyId::try_from("").is_err());
    }

    #[test]
    fn study_id_serializes_as_number() {
        let ids = vec![StudyId::from(1), StudyId::from(42)];
        assert_eq!(serde_json::to_string(&ids).unwrap(), "[1,42]");
    }

    #[test]
    fn new_study_is_pending() {
        let study = Study::new(1, "Osprey");
        assert_eq!(study.status, DownloadStatus::Pending);
        assert!(!study.downloaded());
    }

    #[test]
    fn parse_movebank_timestamp() {
        let dt = parse_timestamp("2008-08-09 19:58:00.000").unwrap();
        assert_eq!(dt.timestamp(), 1218311880);

        let dt = parse_timestamp("2008-08-09 19:58:00.250").unwrap();
        assert_eq!(dt.timestamp_millis(), 1218311880250);

        let dt = parse_timestamp("2008-08-09 19:58:00").unwrap();
        assert_eq!(dt.timestamp(), 1218311880);
    }

    #[test]
    fn parse_integer_timestamp() {
        let dt = parse_timestamp("1218311880250").unwrap();
        assert_eq!(dt.timestamp_millis(), 1218311880250);
    }

    #[test]
    fn parse_invalid_timestamp() {
        assert!(parse_timestamp("yesterday").is_err());
        assert!(parse_timestamp("2008-13-09 19:58:00").is_err());
    }

    #[test]
    fn movement_point_serializes_nulls() {
        let point = MovementPoint {
            id: 3,
            epoch_time: 1000,
            latitude: None,
            longitude: Some(8.5),
        };
        let json = serde_json::to_value(point).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": 3, "epoch_time": 1000, "latitude": null, "longitude": 8.5})
        );
    }
}
