//! # Completion Detection
//!
//! Decides when all fan-out work for a scan has drained. Counters alone can
//! race with jobs that were enqueued but not yet reflected in a freshly-read
//! counter, so the check is three-part: both in-flight counters drained AND
//! no job tagged with the root id still waiting/delayed in the fetch queue.
//! The queue scan is a best-effort compensating check, not a strict barrier.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::crawl::jobs::QueueName;
use crate::crawl::ports::{JobQueue, JobState, QueueError, StoreError};
use crate::crawl::progress::{ProgressTracker, ScanState};
use crate::domain::identity::RootId;

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Evaluated after every page completion and every fetch completion.
#[derive(Clone)]
pub struct CompletionDetector {
    queue: Arc<dyn JobQueue>,
    progress: ProgressTracker,
}

impl CompletionDetector {
    #[must_use]
    pub fn new(queue: Arc<dyn JobQueue>, progress: ProgressTracker) -> Self {
        Self { queue, progress }
    }

    /// Re-evaluates the terminal condition for a scan. Returns whether the
    /// scan is (now) ready. Safe to call concurrently: the transition is
    /// idempotent.
    pub async fn evaluate(&self, root: &RootId) -> Result<bool, CompletionError> {
        if self.progress.state(root).await? == Some(ScanState::Ready) {
            return Ok(true);
        }

        let open_pages = self.progress.open_pages(root).await?;
        if open_pages > 0 {
            debug!(root = %root, open_pages, "scan not ready: pages in flight");
            return Ok(false);
        }

        let open_fetch = self.progress.open_fetch(root).await?;
        if open_fetch != 0 {
            debug!(root = %root, open_fetch, "scan not ready: fetches in flight");
            return Ok(false);
        }

        // Compensating check for the enqueued-but-not-yet-counted window
        let pending = self
            .queue
            .list_jobs(QueueName::MatchFetch, &[JobState::Waiting, JobState::Delayed])
            .await?;
        if pending.iter().any(|job| job.payload.root_id() == root) {
            debug!(root = %root, "scan not ready: fetch jobs still queued");
            return Ok(false);
        }

        self.progress.mark_ready(root).await?;
        info!(root = %root, "scan complete, progress marked ready");
        Ok(true)
    }
}
