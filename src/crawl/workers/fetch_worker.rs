//! # Fetch-Stage Worker
//!
//! Consumes one per-match job: fetches the match detail, then the timeline
//! after a short smoothing delay, persists both documents, updates the
//! cumulative counters and re-evaluates scan completion. A missing timeline
//! is partial success; only hard fetch errors fail the attempt.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use super::{JobHandler, WorkerError};
use crate::crawl::completion::CompletionDetector;
use crate::crawl::jobs::{FetchMatchJob, JobPayload};
use crate::crawl::ports::{DocumentSink, MatchApi};
use crate::crawl::progress::ProgressTracker;
use crate::domain::types::{DocumentKind, PartitionKey};
use async_trait::async_trait;

/// Fetch-stage knobs.
#[derive(Debug, Clone, Copy)]
pub struct FetchStageTuning {
    /// Pause between the detail and timeline requests, smoothing load on
    /// top of the pool's rate limiter.
    pub timeline_delay: Duration,
}

impl Default for FetchStageTuning {
    fn default() -> Self {
        Self {
            timeline_delay: Duration::from_millis(250),
        }
    }
}

pub struct FetchStageWorker {
    api: Arc<dyn MatchApi>,
    sink: Arc<dyn DocumentSink>,
    progress: ProgressTracker,
    detector: CompletionDetector,
    tuning: FetchStageTuning,
}

impl FetchStageWorker {
    #[must_use]
    pub fn new(
        api: Arc<dyn MatchApi>,
        sink: Arc<dyn DocumentSink>,
        progress: ProgressTracker,
        detector: CompletionDetector,
        tuning: FetchStageTuning,
    ) -> Self {
        Self {
            api,
            sink,
            progress,
            detector,
            tuning,
        }
    }

    /// Fetches and persists one match. Storage writes are awaited: the job
    /// only counts as successful once both documents are durable.
    pub async fn process(&self, job: &FetchMatchJob) -> Result<(), WorkerError> {
        let detail = self
            .api
            .match_detail(job.region, &job.match_id)
            .await
            .map_err(WorkerError::from_api)?;

        sleep(self.tuning.timeline_delay).await;

        let timeline = self
            .api
            .match_timeline(job.region, &job.match_id)
            .await
            .map_err(WorkerError::from_api)?;

        let key = PartitionKey::for_match(job.season, &job.match_id, &detail);
        self.sink.put(&key, DocumentKind::Match, &detail).await?;

        let timeline_stored = match &timeline {
            Some(payload) => {
                self.sink.put(&key, DocumentKind::Timeline, payload).await?;
                timeline_has_frames(payload)
            }
            None => {
                info!(root = %job.root_id, match_id = %job.match_id, "no timeline data, match persisted without it");
                false
            }
        };

        self.progress
            .record_match_fetched(&job.root_id, timeline_stored)
            .await?;
        self.progress.decr_open_fetch(&job.root_id).await?;
        self.detector.evaluate(&job.root_id).await?;
        Ok(())
    }
}

/// Whether a timeline payload actually carries frame data.
fn timeline_has_frames(timeline: &serde_json::Value) -> bool {
    timeline["info"]["frames"]
        .as_array()
        .is_some_and(|frames| !frames.is_empty())
}

#[async_trait]
impl JobHandler for FetchStageWorker {
    async fn handle(&self, payload: JobPayload) -> Result<(), WorkerError> {
        match payload {
            JobPayload::FetchMatch(job) => self.process(&job).await,
            other => Err(WorkerError::InvalidJob(format!(
                "fetch-stage worker received {} job",
                other.kind()
            ))),
        }
    }

    async fn on_final_failure(&self, payload: &JobPayload) {
        // A permanently failed fetch must still release its slot, otherwise
        // the scan can never drain to ready.
        let JobPayload::FetchMatch(job) = payload else {
            return;
        };
        warn!(
            root = %job.root_id,
            match_id = %job.match_id,
            "match fetch abandoned after final retry"
        );
        if let Err(err) = self.progress.decr_open_fetch(&job.root_id).await {
            warn!(root = %job.root_id, error = %err, "failed to release open-fetch slot");
            return;
        }
        if let Err(err) = self.detector.evaluate(&job.root_id).await {
            warn!(root = %job.root_id, error = %err, "completion check after abandoned fetch failed");
        }
    }
}
