//! # Stage Workers
//!
//! The two queue consumers of the pipeline. Workers hold only `Arc`'d ports
//! and are safe to run from any number of processes concurrently: all
//! coordination goes through the progress store and the queue itself.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::crawl::completion::CompletionError;
use crate::crawl::jobs::JobPayload;
use crate::crawl::ports::{ApiError, QueueError, SinkError, StoreError};

pub mod fetch_worker;
pub mod list_worker;

pub use fetch_worker::{FetchStageTuning, FetchStageWorker};
pub use list_worker::{ListStageTuning, ListStageWorker};

/// Worker failure taxonomy. `RateLimited` is the only class the queue
/// runtime requeues with an advised delay; everything else is fatal to the
/// attempt and subject to the queue's own retry policy.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("rate limited by upstream, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("upstream error: {0}")]
    Upstream(ApiError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("progress store error: {0}")]
    Store(#[from] StoreError),

    #[error("storage error: {0}")]
    Sink(#[from] SinkError),

    #[error("completion check failed: {0}")]
    Completion(#[from] CompletionError),

    #[error("invalid job payload: {0}")]
    InvalidJob(String),
}

impl WorkerError {
    /// Maps an upstream error, diverting the rate-limit class so it keeps
    /// its advised delay through the worker boundary.
    #[must_use]
    pub fn from_api(err: ApiError) -> Self {
        match err {
            ApiError::RateLimited { retry_after } => Self::RateLimited { retry_after },
            other => Self::Upstream(other),
        }
    }

    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Contract between the queue runtime and a stage worker. The runtime calls
/// [`handle`](JobHandler::handle) once per delivery (at-least-once) and
/// [`on_final_failure`](JobHandler::on_final_failure) exactly once when a
/// job's attempts are exhausted and it lands in the failed set.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, payload: JobPayload) -> Result<(), WorkerError>;

    /// Invoked for a job that will never run again. Default: nothing.
    async fn on_final_failure(&self, _payload: &JobPayload) {}
}
