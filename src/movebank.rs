//! Movebank direct-read client

use std::fmt;
use std::future::Future;

use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::{config::MovebankConfig, errors::RecorderError, models::StudyId};

mod parse;

pub use parse::{is_error_page, parse_movement_path, parse_study_list};

const STUDY_ATTRIBUTES: &str = "id,name,timestamp_last_deployed_location,number_of_individuals,contact_person_name,principal_investigator_name";
const EVENT_ATTRIBUTES: &str = "timestamp,location_long,location_lat";

/// Short-lived Movebank API token
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken(String);

impl ApiToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiToken(..)")
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(rename = "api-token")]
    api_token: String,
}

/// Remote source of studies and movement data
pub trait TrackingSource {
    /// Exchange the configured credentials for an API token
    fn authenticate(&self) -> impl Future<Output = Result<ApiToken, RecorderError>> + Send;

    /// Raw study list payload
    fn fetch_study_list(
        &self,
        token: &ApiToken,
    ) -> impl Future<Output = Result<String, RecorderError>> + Send;

    /// Raw movement payload for one study, `None` when the service answered
    /// with an error page instead of data
    fn fetch_movement_path(
        &self,
        token: &ApiToken,
        study_id: StudyId,
    ) -> impl Future<Output = Result<Option<String>, RecorderError>> + Send;
}

/// HTTP client for the Movebank direct-read service
pub struct MovebankClient {
    http: reqwest::Client,
    config: MovebankConfig,
}

impl MovebankClient {
    pub fn new(config: &MovebankConfig) -> Result<Self, RecorderError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("movebank-recorder/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            config: config.clone(),
        })
    }

    async fn get_text(
        &self,
        what: &str,
        query: &[(&str, &str)],
    ) -> Result<String, RecorderError> {
        debug!(what, "Requesting from Movebank");

        let response = self
            .http
            .get(&self.config.base_url)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            error!(what, %status, "Movebank request failed");
            return Err(RecorderError::Fetch {
                what: what.to_string(),
                status: status.to_string(),
            });
        }

        Ok(response.text().await?)
    }
}

impl TrackingSource for MovebankClient {
    async fn authenticate(&self) -> Result<ApiToken, RecorderError> {
        let response = self
            .http
            .get(&self.config.base_url)
            .query(&[("service", "request-token")])
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            error!(%status, "Authentication with Movebank failed");
            return Err(RecorderError::Authentication {
                service: "Movebank".to_string(),
                status: status.to_string(),
            });
        }

        let body: TokenResponse =
            response
                .json()
                .await
                .map_err(|e| RecorderError::Authentication {
                    service: "Movebank".to_string(),
                    status: format!("unreadable token response: {}", e),
                })?;

        info!("Authenticated with Movebank");
        Ok(ApiToken::new(body.api_token))
    }

    async fn fetch_study_list(&self, token: &ApiToken) -> Result<String, RecorderError> {
        self.get_text(
            "study list",
            &[
                ("entity_type", "study"),
                ("i_can_see_data", "true"),
                ("attributes", STUDY_ATTRIBUTES),
                ("api-token", token.as_str()),
            ],
        )
        .await
    }

    async fn fetch_movement_path(
        &self,
        token: &ApiToken,
        study_id: StudyId,
    ) -> Result<Option<String>, RecorderError> {
        let study = study_id.to_string();
        let payload = self
            .get_text(
                "movement path",
                &[
                    ("entity_type", "event"),
                    ("study_id", study.as_str()),
                    ("attributes", EVENT_ATTRIBUTES),
                    ("api-token", token.as_str()),
                ],
            )
            .await?;

        if is_error_page(&payload) {
            warn!(%study_id, "Movebank returned an error page instead of movement data");
            return Ok(None);
        }

        Ok(Some(payload))
    }
}
