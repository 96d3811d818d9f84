//! Study reconciliation and movement download pipeline

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::{
    config::{FailurePolicy, PipelineConfig},
    errors::RecorderError,
    movebank::{parse_study_list, ApiToken, TrackingSource},
    store::{PathStore, StudyStore},
};

mod downloader;

pub use downloader::{CycleOutcome, Downloader};

/// Pipeline progress, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    LoadingLocal,
    Authenticating,
    FetchingRemoteList,
    Reconciling,
    Ready,
    Failed,
}

/// How often download cycles run after reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// A single cycle right after reconciliation
    Once,
    /// One cycle after reconciliation, then one per period
    Every(Duration),
}

impl From<&PipelineConfig> for RunMode {
    fn from(config: &PipelineConfig) -> Self {
        match config.download_interval {
            Some(period) => RunMode::Every(period),
            None => RunMode::Once,
        }
    }
}

/// Reconciles the remote study list into the local stores and drives the
/// incremental downloader
pub struct Pipeline<S> {
    source: S,
    studies: Arc<StudyStore>,
    paths: Arc<PathStore>,
    downloader: Downloader,
    state: PipelineState,
}

impl<S: TrackingSource> Pipeline<S> {
    pub fn new(
        source: S,
        studies: Arc<StudyStore>,
        paths: Arc<PathStore>,
        policy: FailurePolicy,
    ) -> Self {
        let downloader = Downloader::new(Arc::clone(&studies), Arc::clone(&paths), policy);
        Self {
            source,
            studies,
            paths,
            downloader,
            state: PipelineState::Idle,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) {
        info!(from = ?self.state, to = ?next, "Pipeline state change");
        self.state = next;
    }

    /// Load local state, then merge the remote study list into it
    ///
    /// Returns the token used, for the download cycles that follow. Any
    /// failure leaves the pipeline in `Failed`; nothing is retried.
    pub async fn reconcile(&mut self) -> Result<ApiToken, RecorderError> {
        match self.try_reconcile().await {
            Ok(token) => Ok(token),
            Err(e) => {
                error!(state = ?self.state, error = %e, "Reconciliation aborted");
                self.state = PipelineState::Failed;
                Err(e)
            }
        }
    }

    async fn try_reconcile(&mut self) -> Result<ApiToken, RecorderError> {
        self.transition(PipelineState::LoadingLocal);
        self.studies.load_all().await?;
        self.paths.load_all().await?;

        self.transition(PipelineState::Authenticating);
        let token = self.source.authenticate().await?;

        self.transition(PipelineState::FetchingRemoteList);
        let payload = self.source.fetch_study_list(&token).await?;
        let remote = parse_study_list(&payload)?;

        self.transition(PipelineState::Reconciling);
        let remote_count = remote.len();
        let inserted = self.studies.upsert_if_absent(remote).await?;
        info!(
            remote = remote_count,
            inserted = inserted.len(),
            "Reconciled study list"
        );

        self.transition(PipelineState::Ready);
        Ok(token)
    }

    /// Run one incremental download cycle
    pub async fn run_one_cycle(&self, token: &ApiToken) -> Result<CycleOutcome, RecorderError> {
        let outcome = self.downloader.run_one_cycle(&self.source, token).await?;
        info!(?outcome, "Download cycle finished");
        Ok(outcome)
    }

    /// Reconcile, then run download cycles according to `mode`
    ///
    /// In periodic mode a fresh token is requested for every cycle that has
    /// a pending study. A failed authentication or cycle is logged and the
    /// schedule continues.
    pub async fn run(mut self, mode: RunMode) -> Result<(), RecorderError> {
        let token = self.reconcile().await?;
        let first = self.run_one_cycle(&token).await;

        let RunMode::Every(period) = mode else {
            return first.map(|_| ());
        };
        if let Err(e) = first {
            error!(error = %e, "Download cycle failed");
        }

        info!(?period, "Scheduling periodic downloads");
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            if self.studies.next_pending().await.is_none() {
                debug!("No pending studies");
                continue;
            }

            let token = match self.source.authenticate().await {
                Ok(token) => token,
                Err(e) => {
                    error!(error = %e, "Skipping download cycle");
                    continue;
                }
            };
            if let Err(e) = self.run_one_cycle(&token).await {
                error!(error = %e, "Download cycle failed");
            }
        }
    }
}
