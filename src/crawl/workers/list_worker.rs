//! # List-Stage Worker
//!
//! Consumes one list-page job at a time: fetches a page of match ids,
//! fans out fetch jobs with global per-match dedup, paginates itself by
//! re-enqueueing the next page, and re-evaluates scan completion. Runs with
//! global concurrency 1 behind a strict upstream rate limit; the limiting
//! itself is the queue runtime's job, this worker only surfaces rate-limit
//! errors in a requeue-able form.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{JobHandler, WorkerError};
use crate::crawl::completion::CompletionDetector;
use crate::crawl::jobs::{FetchMatchJob, JobPayload, ListPageJob, QueueName};
use crate::crawl::ports::{ApiError, EnqueueOptions, JobQueue, JobState, ListQuery, MatchApi};
use crate::crawl::progress::ProgressTracker;
use crate::domain::types::MatchId;
use async_trait::async_trait;

/// List-stage knobs; the upstream caps pages at 100 ids.
#[derive(Debug, Clone, Copy)]
pub struct ListStageTuning {
    pub page_size: u32,
}

impl Default for ListStageTuning {
    fn default() -> Self {
        Self { page_size: 100 }
    }
}

pub struct ListStageWorker {
    api: Arc<dyn MatchApi>,
    queue: Arc<dyn JobQueue>,
    progress: ProgressTracker,
    detector: CompletionDetector,
    tuning: ListStageTuning,
}

impl ListStageWorker {
    #[must_use]
    pub fn new(
        api: Arc<dyn MatchApi>,
        queue: Arc<dyn JobQueue>,
        progress: ProgressTracker,
        detector: CompletionDetector,
        tuning: ListStageTuning,
    ) -> Self {
        Self {
            api,
            queue,
            progress,
            detector,
            tuning,
        }
    }

    /// Processes one page of listing for one queue type.
    pub async fn process(&self, job: &ListPageJob) -> Result<(), WorkerError> {
        let query = ListQuery {
            start: job.offset,
            count: self.tuning.page_size,
            queue: job.queue_type,
            start_time: job.season.start_epoch_secs(),
        };

        let ids = match self
            .api
            .list_match_ids(job.region, &job.player, &query)
            .await
        {
            Ok(ids) => ids,
            Err(ApiError::RateLimited { retry_after }) => {
                // Surface the advised delay on the record, then re-raise so
                // the queue's backoff machinery requeues this page.
                warn!(
                    root = %job.root_id,
                    queue_type = %job.queue_type,
                    offset = job.offset,
                    ?retry_after,
                    "upstream rate limit on list page"
                );
                self.progress
                    .note_rate_limited(&job.root_id, retry_after)
                    .await?;
                return Err(WorkerError::RateLimited { retry_after });
            }
            Err(other) => return Err(WorkerError::Upstream(other)),
        };

        info!(
            root = %job.root_id,
            queue_type = %job.queue_type,
            offset = job.offset,
            ids = ids.len(),
            "listed match-id page"
        );
        self.progress
            .record_page_listed(&job.root_id, job.queue_type, ids.len() as u64)
            .await?;

        for match_id in &ids {
            self.dispatch_fetch(job, match_id).await?;
        }

        // A full page means more history may exist; later offsets are
        // one-shot advances and enqueue without a dedup key.
        if ids.len() as u32 == self.tuning.page_size {
            self.progress.incr_open_pages(&job.root_id).await?;
            let next = job.next_page(self.tuning.page_size);
            self.queue
                .enqueue(
                    QueueName::ListPages,
                    JobPayload::ListPage(next),
                    EnqueueOptions::default(),
                )
                .await?;
        }

        self.progress.decr_open_pages(&job.root_id).await?;
        self.detector.evaluate(&job.root_id).await?;
        Ok(())
    }

    /// Routes one discovered match id through the global dedup rules.
    async fn dispatch_fetch(
        &self,
        job: &ListPageJob,
        match_id: &MatchId,
    ) -> Result<(), WorkerError> {
        match self
            .queue
            .job_state(QueueName::MatchFetch, match_id.as_str())
            .await?
        {
            Some(JobState::Completed) => {
                // Already indexed elsewhere: credit the counters, spawn nothing.
                debug!(root = %job.root_id, match_id = %match_id, "match already indexed");
                self.progress.credit_indexed_match(&job.root_id).await?;
            }
            Some(JobState::Failed) => {
                // Stale terminal failure: clear it and try again fresh.
                self.queue
                    .remove(QueueName::MatchFetch, match_id.as_str())
                    .await?;
                self.enqueue_fetch(job, match_id).await?;
            }
            Some(_) => {
                debug!(root = %job.root_id, match_id = %match_id, "fetch already queued, skipping");
            }
            None => self.enqueue_fetch(job, match_id).await?,
        }
        Ok(())
    }

    async fn enqueue_fetch(&self, job: &ListPageJob, match_id: &MatchId) -> Result<(), WorkerError> {
        // Increment strictly before enqueue: the counter may over-report
        // in-flight work for a moment, never under-report it.
        self.progress.incr_open_fetch(&job.root_id).await?;
        let fetch = FetchMatchJob {
            root_id: job.root_id.clone(),
            region: job.region,
            season: job.season,
            match_id: match_id.clone(),
        };
        self.queue
            .enqueue(
                QueueName::MatchFetch,
                JobPayload::FetchMatch(fetch),
                EnqueueOptions {
                    job_id: Some(match_id.as_str().to_string()),
                    delay: None,
                },
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl JobHandler for ListStageWorker {
    async fn handle(&self, payload: JobPayload) -> Result<(), WorkerError> {
        match payload {
            JobPayload::ListPage(job) => self.process(&job).await,
            other => Err(WorkerError::InvalidJob(format!(
                "list-stage worker received {} job",
                other.kind()
            ))),
        }
    }

    async fn on_final_failure(&self, payload: &JobPayload) {
        // A page abandoned after its last retry still held an open-pages
        // slot; release it so the scan can drain.
        let JobPayload::ListPage(job) = payload else {
            return;
        };
        warn!(
            root = %job.root_id,
            queue_type = %job.queue_type,
            offset = job.offset,
            "list page abandoned after final retry"
        );
        if let Err(err) = self.progress.decr_open_pages(&job.root_id).await {
            warn!(root = %job.root_id, error = %err, "failed to release open-pages slot");
            return;
        }
        if let Err(err) = self.detector.evaluate(&job.root_id).await {
            warn!(root = %job.root_id, error = %err, "completion check after abandoned page failed");
        }
    }
}
