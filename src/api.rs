//! HTTP facade for the browser map

use std::path::Path;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::error;

use crate::{
    models::{MovementPoint, StudyId},
    opensky::{AirportIndex, OpenSkyService},
    store::{PathStore, StudyStore},
};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub studies: Arc<StudyStore>,
    pub paths: Arc<PathStore>,
    pub opensky: Option<Arc<OpenSkyService>>,
}

impl AppState {
    pub fn new(
        studies: Arc<StudyStore>,
        paths: Arc<PathStore>,
        opensky: Option<Arc<OpenSkyService>>,
    ) -> Self {
        Self {
            studies,
            paths,
            opensky,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct MovementQuery {
    pub survey_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FlightsQuery {
    pub begin: Option<String>,
    pub end: Option<String>,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /api/surveys
///
/// Ids of all studies whose download has been attempted.
pub async fn list_surveys(State(state): State<AppState>) -> Json<Vec<StudyId>> {
    Json(state.studies.downloaded_ids().await)
}

/// GET /api/movement?survey_id=X
///
/// Unknown, missing or malformed ids yield an empty array.
pub async fn movement(
    State(state): State<AppState>,
    Query(query): Query<MovementQuery>,
) -> Json<Vec<MovementPoint>> {
    let study_id = query
        .survey_id
        .as_deref()
        .and_then(|id| StudyId::try_from(id).ok());

    match study_id {
        Some(study_id) => Json(state.paths.points_for(study_id).await),
        None => Json(Vec::new()),
    }
}

/// GET /flights/all?begin=B&end=E
pub async fn flights(State(state): State<AppState>, Query(query): Query<FlightsQuery>) -> Response {
    let Some(service) = state.opensky else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let range = query
        .begin
        .as_deref()
        .zip(query.end.as_deref())
        .and_then(|(begin, end)| {
            Some((
                begin.trim().parse::<i64>().ok()?,
                end.trim().parse::<i64>().ok()?,
            ))
        });
    let Some((begin, end)) = range else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Missing begin or end parameter" })),
        )
            .into_response();
    };

    match service.flights_between(begin, end).await {
        Ok(flights) => Json(flights).into_response(),
        Err(e) => {
            error!(error = %e, "Error in /flights/all");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Server error", "details": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// GET /airports
pub async fn airports(State(state): State<AppState>) -> Json<AirportIndex> {
    Json(
        state
            .opensky
            .map(|service| service.airports().clone())
            .unwrap_or_default(),
    )
}

/// Build the application router
///
/// Flight routes are mounted only when the OpenSky demo is configured.
/// When `static_dir` is given, unmatched paths are served from it.
pub fn build_router(state: AppState, static_dir: Option<&Path>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/api/surveys", get(list_surveys))
        .route("/api/surveys/", get(list_surveys))
        .route("/api/movement", get(movement));

    if state.opensky.is_some() {
        router = router
            .route("/flights/all", get(flights))
            .route("/airports", get(airports));
    }

    if let Some(dir) = static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
