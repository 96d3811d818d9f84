//! OpenSky flight-tracking demo
//!
//! Flights are requested from the OpenSky REST API in fixed-width time
//! windows and kept only when both airports are known from the OpenFlights
//! `airports.dat` table.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{config::OpenSkyConfig, errors::RecorderError};

/// Tokens are renewed this long before they expire
const TOKEN_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Airport {
    pub lat: f64,
    pub lon: f64,
}

/// Airport coordinates keyed by ICAO code
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct AirportIndex(HashMap<String, Airport>);

impl AirportIndex {
    /// Read OpenFlights `airports.dat` rows
    ///
    /// Columns 6-8 hold ICAO code, latitude and longitude. Rows that are
    /// short, lack an ICAO code or have non-numeric coordinates are skipped.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, RecorderError> {
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut airports = HashMap::new();
        for record in csv.records() {
            let record = record?;
            if record.len() < 8 {
                continue;
            }

            let icao = record[5].trim();
            if icao.is_empty() || icao == "\\N" {
                continue;
            }

            let (Ok(lat), Ok(lon)) = (
                record[6].trim().parse::<f64>(),
                record[7].trim().parse::<f64>(),
            ) else {
                continue;
            };
            if !lat.is_finite() || !lon.is_finite() {
                continue;
            }

            airports.insert(icao.to_string(), Airport { lat, lon });
        }

        Ok(Self(airports))
    }

    pub async fn load(path: &Path) -> Result<Self, RecorderError> {
        let data = tokio::fs::read(path).await?;
        let index = Self::from_reader(data.as_slice())?;
        info!(count = index.len(), path = %path.display(), "Loaded airports");
        Ok(index)
    }

    pub fn get(&self, icao: &str) -> Option<&Airport> {
        self.0.get(icao)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Flight as returned by `/flights/all`
#[derive(Debug, Clone, Deserialize)]
pub struct RawFlight {
    pub icao24: String,
    pub callsign: Option<String>,
    #[serde(rename = "estDepartureAirport")]
    pub departure: Option<String>,
    #[serde(rename = "estArrivalAirport")]
    pub arrival: Option<String>,
}

/// Flight between two known airports
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Flight {
    pub icao24: String,
    pub callsign: Option<String>,
    pub dep: String,
    pub arr: String,
}

/// Split `[begin, end)` into consecutive windows of at most `width` seconds
pub fn time_slices(begin: i64, end: i64, width: i64) -> Vec<(i64, i64)> {
    if width <= 0 {
        return Vec::new();
    }

    let mut slices = Vec::new();
    let mut start = begin;
    while start < end {
        let stop = start.saturating_add(width).min(end);
        slices.push((start, stop));
        start = stop;
    }
    slices
}

/// Keep flights whose departure and arrival airports are both known
pub fn known_routes(flights: Vec<RawFlight>, airports: &AirportIndex) -> Vec<Flight> {
    flights
        .into_iter()
        .filter_map(|flight| {
            let dep = flight.departure.filter(|icao| airports.get(icao).is_some())?;
            let arr = flight.arrival.filter(|icao| airports.get(icao).is_some())?;
            Some(Flight {
                icao24: flight.icao24,
                callsign: flight.callsign,
                dep,
                arr,
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at > now + TOKEN_MARGIN
    }
}

/// OpenSky API client with an OAuth2 client-credentials token cache
pub struct OpenSkyClient {
    http: reqwest::Client,
    config: OpenSkyConfig,
    token: Mutex<Option<CachedToken>>,
}

impl OpenSkyClient {
    pub fn new(config: &OpenSkyConfig) -> Result<Self, RecorderError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            config: config.clone(),
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, RecorderError> {
        let mut cached = self.token.lock().await;
        let now = Instant::now();

        if let Some(token) = cached.as_ref().filter(|token| token.is_fresh(now)) {
            return Ok(token.value.clone());
        }

        debug!("Requesting OpenSky access token");
        let response = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RecorderError::Authentication {
                service: "OpenSky".to_string(),
                status: format!("{} {}", status, body),
            });
        }

        let token: TokenResponse = response.json().await?;
        let value = token.access_token.clone();
        *cached = Some(CachedToken {
            value: token.access_token,
            expires_at: now + Duration::from_secs(token.expires_in),
        });

        Ok(value)
    }

    /// All flights in `[begin, end)`, queried window by window
    ///
    /// Windows answered with an error status are logged and skipped.
    pub async fn flights(&self, begin: i64, end: i64) -> Result<Vec<RawFlight>, RecorderError> {
        let token = self.access_token().await?;
        let width = self.config.slice_seconds.as_secs() as i64;
        let url = format!("{}/flights/all", self.config.api_url.trim_end_matches('/'));

        let mut flights = Vec::new();
        for (slice_begin, slice_end) in time_slices(begin, end, width) {
            let response = self
                .http
                .get(&url)
                .query(&[("begin", slice_begin), ("end", slice_end)])
                .bearer_auth(&token)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                warn!(slice_begin, slice_end, %status, "OpenSky window failed");
                continue;
            }

            let mut batch: Vec<RawFlight> = response.json().await?;
            flights.append(&mut batch);
        }

        info!(count = flights.len(), "Fetched raw flights");
        Ok(flights)
    }
}

/// Flight client together with the airport table it filters against
pub struct OpenSkyService {
    client: OpenSkyClient,
    airports: AirportIndex,
}

impl OpenSkyService {
    pub fn new(client: OpenSkyClient, airports: AirportIndex) -> Self {
        Self { client, airports }
    }

    pub async fn from_config(config: &OpenSkyConfig) -> Result<Self, RecorderError> {
        let airports = AirportIndex::load(&config.airports_path).await?;
        Ok(Self::new(OpenSkyClient::new(config)?, airports))
    }

    pub fn airports(&self) -> &AirportIndex {
        &self.airports
    }

    /// Flights in `[begin, end)` between known airports
    pub async fn flights_between(&self, begin: i64, end: i64) -> Result<Vec<Flight>, RecorderError> {
        let raw = self.client.flights(begin, end).await?;
        let flights = known_routes(raw, &self.airports);
        info!(count = flights.len(), "Flights after filtering");
        Ok(flights)
    }
}
