//! Errors for the Movebank recorder
use thiserror::Error;

use crate::models::StudyId;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Authentication with {service} failed: {status}")]
    Authentication { service: String, status: String },

    #[error("Could not fetch {what}: {status}")]
    Fetch { what: String, status: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("CSV error")]
    Csv(#[from] csv::Error),

    #[error("Database error")]
    Persistence(#[from] sqlx::Error),

    #[error("Database migration error")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP client error")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error")]
    SerdeError(#[from] serde_json::Error),

    #[error("Configuration error")]
    ConfigError(#[from] config::ConfigError),

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("IO error")]
    IoError(#[from] std::io::Error),

    #[error("Unknown study {0}")]
    UnknownStudy(StudyId),
}
