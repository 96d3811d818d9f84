//! Application configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_with::serde_as;

use crate::errors::RecorderError;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    pub movebank: MovebankConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub server: ServerConfig,
    pub opensky: Option<OpenSkyConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct MovebankConfig {
    #[serde(default = "default_movebank_url")]
    pub base_url: String,
    pub username: String,
    pub password: String,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,
}

/// What to do with a study whose movement download failed
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Mark the study downloaded anyway; it is never fetched again
    #[default]
    MarkAttempted,
    /// Leave the study pending so a later cycle picks it up again
    RetryLater,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PipelineConfig {
    /// Interval between download cycles; run once at startup when absent
    #[serde_as(as = "Option<serde_with::DurationSeconds<u64>>")]
    #[serde(default)]
    pub download_interval: Option<Duration>,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Directory holding the browser map client
    pub static_dir: Option<PathBuf>,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct OpenSkyConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_opensky_token_url")]
    pub token_url: String,
    #[serde(default = "default_opensky_api_url")]
    pub api_url: String,
    #[serde(default = "default_airports_path")]
    pub airports_path: PathBuf,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_slice")]
    pub slice_seconds: Duration,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,
}

fn default_database_url() -> String {
    "sqlite://storage.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_movebank_url() -> String {
    "https://www.movebank.org/movebank/service/direct-read".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

fn default_opensky_token_url() -> String {
    "https://auth.opensky-network.org/auth/realms/opensky-network/protocol/openid-connect/token"
        .to_string()
}

fn default_opensky_api_url() -> String {
    "https://opensky-network.org/api".to_string()
}

fn default_airports_path() -> PathBuf {
    PathBuf::from("airports.dat")
}

fn default_slice() -> Duration {
    Duration::from_secs(2 * 3600)
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            static_dir: None,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                Environment::with_prefix("MOVEBANK_RECORDER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate all configuration sections
    pub fn validate(&self) -> Result<(), RecorderError> {
        self.database.validate()?;
        self.movebank.validate()?;
        self.pipeline.validate()?;
        if let Some(opensky) = &self.opensky {
            opensky.validate()?;
        }
        Ok(())
    }
}

fn invalid(message: &str) -> RecorderError {
    RecorderError::ConfigurationError {
        message: message.to_string(),
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<(), RecorderError> {
        if self.url.trim().is_empty() {
            return Err(invalid("Database URL cannot be empty"));
        }
        if self.max_connections == 0 {
            return Err(invalid("Database max_connections must be greater than zero"));
        }
        Ok(())
    }
}

impl MovebankConfig {
    pub fn validate(&self) -> Result<(), RecorderError> {
        if self.username.trim().is_empty() || self.password.is_empty() {
            return Err(invalid("Movebank credentials cannot be empty"));
        }
        if self.request_timeout.is_zero() {
            return Err(invalid("Movebank request timeout must be greater than zero"));
        }
        Ok(())
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), RecorderError> {
        if self.download_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(invalid("Download interval must be greater than zero"));
        }
        Ok(())
    }
}

impl OpenSkyConfig {
    pub fn validate(&self) -> Result<(), RecorderError> {
        if self.client_id.trim().is_empty() || self.client_secret.is_empty() {
            return Err(invalid("OpenSky credentials cannot be empty"));
        }
        if self.slice_seconds.is_zero() {
            return Err(invalid("OpenSky slice width must be greater than zero"));
        }
        if self.request_timeout.is_zero() {
            return Err(invalid("OpenSky request timeout must be greater than zero"));
        }
        Ok(())
    }
}
