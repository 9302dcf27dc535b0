//! # Root Orchestrator
//!
//! Entry point of a scan: derives the deterministic root id, initializes
//! the progress record and fans out the first list-page job per requested
//! queue type. Returns immediately; crawl completion is observed through
//! the progress record, never awaited here.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::crawl::jobs::{first_page_job_id, JobPayload, ListPageJob, QueueName, ScanRequest};
use crate::crawl::ports::{EnqueueOptions, JobQueue, QueueError, StoreError};
use crate::crawl::progress::ProgressTracker;
use crate::domain::identity::RootId;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct RewindOrchestrator {
    queue: Arc<dyn JobQueue>,
    progress: ProgressTracker,
}

impl RewindOrchestrator {
    #[must_use]
    pub fn new(queue: Arc<dyn JobQueue>, progress: ProgressTracker) -> Self {
        Self { queue, progress }
    }

    /// Starts (or idempotently re-joins) a scan. Concurrent duplicate
    /// requests collapse onto the same root id; a non-expired progress
    /// record is never re-initialized.
    pub async fn start_scan(&self, request: ScanRequest) -> Result<RootId, OrchestratorError> {
        let root = request.root_id();

        if self.progress.state(&root).await?.is_some() {
            debug!(root = %root, "progress record already present, keeping it");
        } else {
            self.progress.init(&root, &request).await?;
        }

        for queue_type in &request.queue_types {
            let job_id = first_page_job_id(request.region, &request.player, *queue_type);

            match self.queue.job_state(QueueName::ListPages, &job_id).await? {
                Some(state) if state.is_terminal() => {
                    // Stale terminal entry holds the identity; clear it so
                    // this submission can run.
                    self.queue.remove(QueueName::ListPages, &job_id).await?;
                }
                Some(_) => {
                    debug!(root = %root, queue_type = %queue_type, "first page already queued, skipping");
                    continue;
                }
                None => {}
            }

            self.progress.incr_open_pages(&root).await?;
            let job = ListPageJob {
                root_id: root.clone(),
                region: request.region,
                player: request.player.clone(),
                queue_type: *queue_type,
                season: request.season,
                offset: 0,
            };
            self.queue
                .enqueue(
                    QueueName::ListPages,
                    JobPayload::ListPage(job),
                    EnqueueOptions {
                        job_id: Some(job_id),
                        delay: None,
                    },
                )
                .await?;
        }

        info!(
            root = %root,
            region = %request.region,
            season = %request.season,
            queue_types = request.queue_types.len(),
            "scan started"
        );
        Ok(root)
    }

    /// The originating request for a root id, for lookup and debugging,
    /// while the retention TTL lives.
    pub async fn request_for(&self, root: &RootId) -> Result<Option<ScanRequest>, OrchestratorError> {
        Ok(self.progress.request_for(root).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::crawl::completion::CompletionDetector;
    use crate::crawl::ports::JobState;
    use crate::crawl::progress::ScanState;
    use crate::crawl::workers::{
        FetchStageTuning, FetchStageWorker, ListStageTuning, ListStageWorker,
    };
    use crate::domain::types::{PlayerId, QueueType, Region, Season};
    use crate::infrastructure::memory_queue::{InMemoryJobQueue, WorkerHost, WorkerHostConfig};
    use crate::infrastructure::memory_store::{InMemoryDocumentSink, InMemoryProgressStore};
    use crate::testkit::FakeMatchApi;

    fn request(queues: Vec<QueueType>) -> ScanRequest {
        ScanRequest {
            scope: "season-rewind".to_string(),
            region: Region::Americas,
            player: PlayerId::new("puuid-1"),
            season: Season::new(2024),
            queue_types: queues,
        }
    }

    fn fixture() -> (RewindOrchestrator, Arc<InMemoryJobQueue>, ProgressTracker) {
        let queue = Arc::new(InMemoryJobQueue::new());
        let progress = ProgressTracker::new(
            Arc::new(InMemoryProgressStore::new()),
            Duration::from_secs(3600),
        );
        let orchestrator = RewindOrchestrator::new(queue.clone(), progress.clone());
        (orchestrator, queue, progress)
    }

    #[tokio::test]
    async fn starts_one_page_job_per_queue_type() {
        let (orchestrator, queue, progress) = fixture();
        let root = orchestrator
            .start_scan(request(vec![QueueType::RankedSolo, QueueType::RankedFlex]))
            .await
            .unwrap();

        assert_eq!(progress.open_pages(&root).await.unwrap(), 2);
        let waiting = queue
            .list_jobs(QueueName::ListPages, &[JobState::Waiting])
            .await
            .unwrap();
        assert_eq!(waiting.len(), 2);
        assert_eq!(progress.state(&root).await.unwrap(), Some(ScanState::Listing));
    }

    #[tokio::test]
    async fn duplicate_start_is_idempotent() {
        let (orchestrator, queue, progress) = fixture();
        let req = request(vec![QueueType::RankedSolo]);

        let first = orchestrator.start_scan(req.clone()).await.unwrap();
        progress
            .record_page_listed(&first, QueueType::RankedSolo, 5)
            .await
            .unwrap();

        let second = orchestrator.start_scan(req).await.unwrap();
        assert_eq!(first, second);

        // No double-init: the listed page survived, no second page-0 job
        let snap = progress.snapshot(&first).await.unwrap().unwrap();
        assert_eq!(snap.ids_found, 5);
        assert_eq!(progress.open_pages(&first).await.unwrap(), 1);
        let waiting = queue
            .list_jobs(QueueName::ListPages, &[JobState::Waiting])
            .await
            .unwrap();
        assert_eq!(waiting.len(), 1);
    }

    #[tokio::test]
    async fn terminal_first_page_is_cleared_and_resubmitted() {
        let (orchestrator, queue, progress) = fixture();
        let req = request(vec![QueueType::RankedSolo]);
        let job_id = first_page_job_id(req.region, &req.player, QueueType::RankedSolo);

        queue
            .seed_terminal(QueueName::ListPages, &job_id, JobState::Failed)
            .await;

        let root = orchestrator.start_scan(req).await.unwrap();
        assert_eq!(
            queue
                .job_state(QueueName::ListPages, &job_id)
                .await
                .unwrap(),
            Some(JobState::Waiting)
        );
        assert_eq!(progress.open_pages(&root).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn request_side_mapping_survives_start() {
        let (orchestrator, _queue, _progress) = fixture();
        let req = request(vec![QueueType::RankedSolo]);
        let root = orchestrator.start_scan(req.clone()).await.unwrap();

        assert_eq!(orchestrator.request_for(&root).await.unwrap(), Some(req));
    }

    /// Scenario: a single short page of 37 matches, run end to end through
    /// the in-memory queue runtime until the scan drains to ready.
    #[tokio::test]
    async fn short_scan_runs_to_ready_end_to_end() {
        let api = Arc::new(FakeMatchApi::new().with_page(QueueType::RankedSolo, 0, 37));
        let queue = Arc::new(InMemoryJobQueue::new());
        let sink = Arc::new(InMemoryDocumentSink::new());
        let progress = ProgressTracker::new(
            Arc::new(InMemoryProgressStore::new()),
            Duration::from_secs(3600),
        );
        let detector = CompletionDetector::new(queue.clone(), progress.clone());
        let orchestrator = RewindOrchestrator::new(queue.clone(), progress.clone());

        let list_worker = Arc::new(ListStageWorker::new(
            api.clone(),
            queue.clone(),
            progress.clone(),
            detector.clone(),
            ListStageTuning::default(),
        ));
        let fetch_worker = Arc::new(FetchStageWorker::new(
            api,
            sink.clone(),
            progress.clone(),
            detector,
            FetchStageTuning {
                timeline_delay: Duration::ZERO,
            },
        ));

        // High rates so the test completes quickly; concurrency mirrors
        // production shape (1 lister, 2 fetchers)
        let list_host = WorkerHost::new(
            queue.clone(),
            QueueName::ListPages,
            list_worker,
            WorkerHostConfig {
                concurrency: 1,
                rate_per_sec: 1_000,
                max_attempts: 3,
                retry_delay: Duration::from_millis(10),
            },
        );
        let fetch_host = WorkerHost::new(
            queue.clone(),
            QueueName::MatchFetch,
            fetch_worker,
            WorkerHostConfig {
                concurrency: 2,
                rate_per_sec: 1_000,
                max_attempts: 3,
                retry_delay: Duration::from_millis(10),
            },
        );
        let list_handle = list_host.spawn();
        let fetch_handle = fetch_host.spawn();

        let root = orchestrator
            .start_scan(request(vec![QueueType::RankedSolo]))
            .await
            .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            if progress.state(&root).await.unwrap() == Some(ScanState::Ready) {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "scan did not reach ready in time"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let snap = progress.snapshot(&root).await.unwrap().unwrap();
        assert_eq!(snap.ids_found, 37);
        assert_eq!(snap.matches_fetched, 37);
        assert_eq!(snap.timelines_fetched, 37);
        assert_eq!(snap.open_pages, 0);
        assert_eq!(snap.open_fetch, 0);
        // One match + one timeline document per fetched match
        assert_eq!(sink.document_count(), 74);

        list_handle.shutdown().await;
        fetch_handle.shutdown().await;
    }
}
