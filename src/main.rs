//! Movebank recorder utility

use std::sync::Arc;

use movebank_recorder::{
    api::{self, AppState},
    config::AppConfig,
    database::Database,
    errors::RecorderError,
    movebank::MovebankClient,
    opensky::OpenSkyService,
    pipeline::{Pipeline, RunMode},
    store::{PathStore, StudyStore},
};
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), RecorderError> {
    #[cfg(feature = "dotenv")]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(
        "Starting movebank-recorder v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Environment variables override config/default.toml
    let config = AppConfig::load()?;
    config.validate()?;

    let db = Database::connect(&config.database).await?;
    let studies = Arc::new(StudyStore::new(db.clone()));
    let paths = Arc::new(PathStore::new(db));

    let opensky = match &config.opensky {
        Some(opensky_config) => match OpenSkyService::from_config(opensky_config).await {
            Ok(service) => Some(Arc::new(service)),
            Err(e) => {
                warn!("OpenSky demo disabled: {}", e);
                None
            }
        },
        None => None,
    };

    let client = MovebankClient::new(&config.movebank)?;
    let pipeline = Pipeline::new(
        client,
        Arc::clone(&studies),
        Arc::clone(&paths),
        config.pipeline.failure_policy,
    );
    let mode = RunMode::from(&config.pipeline);

    let downloader = tokio::spawn(async move {
        if let Err(e) = pipeline.run(mode).await {
            error!("Movebank pipeline stopped: {}", e);
        }
    });

    let state = AppState::new(studies, paths, opensky);
    let app = api::build_router(state, config.server.static_dir.as_deref());

    let listener = tokio::net::TcpListener::bind(config.server.bind_addr).await?;
    info!("Listening on http://{}", config.server.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Received shutdown signal");
        })
        .await?;

    downloader.abort();

    Ok(())
}
