//! Integration tests for the HTTP facade

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::{json, Value};
use tower::util::ServiceExt; // for `oneshot`

use movebank_recorder::{
    api::{build_router, AppState},
    config::OpenSkyConfig,
    database::Database,
    models::{DownloadOutcome, PathPoint, Study},
    opensky::{AirportIndex, OpenSkyClient, OpenSkyService},
    store::{PathStore, StudyStore},
};

async fn setup_stores() -> (Arc<StudyStore>, Arc<PathStore>) {
    let db = Database::from_url("sqlite::memory:", 1)
        .await
        .expect("Failed to open in-memory database");
    let studies = Arc::new(StudyStore::new(db.clone()));
    let paths = Arc::new(PathStore::new(db));

    studies
        .upsert_if_absent(vec![
            Study::new(1, "Osprey"),
            Study::new(2, "White stork"),
            Study::new(3, "Crane"),
        ])
        .await
        .unwrap();
    paths
        .append_path(
            1.into(),
            &[
                PathPoint {
                    epoch_time: 1000,
                    latitude: Some(60.1),
                    longitude: Some(24.9),
                },
                PathPoint {
                    epoch_time: 2000,
                    latitude: None,
                    longitude: None,
                },
            ],
        )
        .await
        .unwrap();
    studies
        .mark_downloaded(1.into(), DownloadOutcome::WithData)
        .await
        .unwrap();
    studies
        .mark_downloaded(3.into(), DownloadOutcome::Empty)
        .await
        .unwrap();

    (studies, paths)
}

fn opensky_service() -> Arc<OpenSkyService> {
    let config = OpenSkyConfig {
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
        // Nothing listens here; handlers under test must not reach the network
        token_url: "http://127.0.0.1:9/token".to_string(),
        api_url: "http://127.0.0.1:9/api".to_string(),
        airports_path: PathBuf::from("airports.dat"),
        slice_seconds: Duration::from_secs(7200),
        request_timeout: Duration::from_secs(1),
    };
    let airports = AirportIndex::from_reader(
        r#"507,"London Heathrow Airport","London","United Kingdom","LHR","EGLL",51.4706,-0.461941,83,0,"E","Europe/London","airport","OurAirports""#
            .as_bytes(),
    )
    .unwrap();
    Arc::new(OpenSkyService::new(
        OpenSkyClient::new(&config).unwrap(),
        airports,
    ))
}

async fn setup_app(with_opensky: bool) -> axum::Router {
    let (studies, paths) = setup_stores().await;
    let opensky = with_opensky.then(opensky_service);
    build_router(AppState::new(studies, paths, opensky), None)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

#[tokio::test]
async fn test_health() {
    let app = setup_app(false).await;

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_surveys_lists_downloaded_ids() {
    let app = setup_app(false).await;

    let response = app.oneshot(get("/api/surveys")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(extract_json(response.into_body()).await, json!([1, 3]));
}

#[tokio::test]
async fn test_surveys_trailing_slash() {
    let app = setup_app(false).await;

    let response = app.oneshot(get("/api/surveys/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(extract_json(response.into_body()).await, json!([1, 3]));
}

#[tokio::test]
async fn test_movement_for_study() {
    let app = setup_app(false).await;

    let response = app.oneshot(get("/api/movement?survey_id=1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    let points = body.as_array().unwrap();
    assert_eq!(points.len(), 2);
    assert_eq!(points[0]["epoch_time"], 1000);
    assert_eq!(points[0]["latitude"], 60.1);
    assert_eq!(points[0]["longitude"], 24.9);
    assert!(points[0]["id"].is_i64());
    assert!(points[1]["latitude"].is_null());
}

#[tokio::test]
async fn test_movement_unknown_study_is_empty() {
    let app = setup_app(false).await;

    let response = app
        .oneshot(get("/api/movement?survey_id=999"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(extract_json(response.into_body()).await, json!([]));
}

#[tokio::test]
async fn test_movement_without_or_bad_id_is_empty() {
    let app = setup_app(false).await;

    for uri in ["/api/movement", "/api/movement?survey_id=abc"] {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(extract_json(response.into_body()).await, json!([]));
    }
}

#[tokio::test]
async fn test_flight_routes_absent_without_opensky() {
    let app = setup_app(false).await;

    let response = app.oneshot(get("/airports")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_flights_missing_range() {
    let app = setup_app(true).await;

    for uri in ["/flights/all", "/flights/all?begin=100", "/flights/all?begin=x&end=200"] {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = extract_json(response.into_body()).await;
        assert_eq!(body["error"], "Missing begin or end parameter");
    }
}

#[tokio::test]
async fn test_airports() {
    let app = setup_app(true).await;

    let response = app.oneshot(get("/airports")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        extract_json(response.into_body()).await,
        json!({"EGLL": {"lat": 51.4706, "lon": -0.461941}})
    );
}
