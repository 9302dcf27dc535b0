//! # External Collaborator Ports
//!
//! Trait boundaries for everything the orchestration layer does not own:
//! the durable job queue, the shared progress store, the upstream match API
//! and the document storage writer. The traits let production backends and
//! the in-memory test backends be swapped without touching worker logic.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crawl::jobs::{JobPayload, QueueName};
use crate::domain::types::{DocumentKind, MatchId, PartitionKey, PlayerId, QueueType, Region};

/// Upstream API failure classes. Rate limiting is signalled distinctly so
/// the list stage can surface it for queue-level backoff instead of treating
/// it as a fatal attempt.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("upstream returned status {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("payload decode error: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue backend error: {0}")]
    Backend(String),

    #[error("queue is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("progress store error: {0}")]
    Backend(String),

    #[error("non-numeric value at {key}")]
    NotANumber { key: String },
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("storage write failed: {0}")]
    Backend(String),
}

/// Lifecycle state of a queued job as reported by the queue backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Delayed,
    Completed,
    Failed,
}

impl JobState {
    /// Terminal states: the job will not run again without resubmission.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Options for a single enqueue.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Caller-supplied identity; a second enqueue with the same id is a
    /// no-op while the first entry exists in any state.
    pub job_id: Option<String>,
    /// Initial delay before the job becomes runnable.
    pub delay: Option<Duration>,
}

/// Snapshot of a queued job returned by bulk listing.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: String,
    pub state: JobState,
    pub attempts: u32,
    pub payload: JobPayload,
}

/// Durable, named queues of typed jobs with identity-based deduplication.
///
/// The backing runtime is assumed to provide at-least-once delivery and
/// per-job retry/backoff; this port only covers what the orchestration
/// layer itself needs: enqueue, state inspection, removal and bulk listing.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(
        &self,
        queue: QueueName,
        payload: JobPayload,
        opts: EnqueueOptions,
    ) -> Result<(), QueueError>;

    /// State of the job with the given identity, `None` if unknown.
    async fn job_state(&self, queue: QueueName, job_id: &str)
    -> Result<Option<JobState>, QueueError>;

    /// Removes a job entry entirely, freeing its identity for resubmission.
    async fn remove(&self, queue: QueueName, job_id: &str) -> Result<(), QueueError>;

    /// All jobs currently in one of the given states.
    async fn list_jobs(
        &self,
        queue: QueueName,
        states: &[JobState],
    ) -> Result<Vec<JobRecord>, QueueError>;
}

/// Shared key-value store used for progress accounting. All counter
/// mutation goes through the atomic increment operations; callers never
/// read-modify-write.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError>;

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Atomically adds `delta` to a hash field, returning the new value.
    async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError>;

    /// Atomically adds `delta` to a plain integer key, returning the new
    /// value. Negative deltas decrement.
    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration)
    -> Result<(), StoreError>;

    /// Resets the TTL of an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;
}

/// One page worth of match-id listing parameters.
#[derive(Debug, Clone, Copy)]
pub struct ListQuery {
    pub start: u32,
    /// Page size; the upstream caps this at 100.
    pub count: u32,
    pub queue: QueueType,
    /// Epoch seconds; matches before this instant are excluded.
    pub start_time: i64,
}

/// Upstream game-data API.
#[async_trait]
pub trait MatchApi: Send + Sync {
    /// Ordered match identifiers for one page of the player's history.
    async fn list_match_ids(
        &self,
        region: Region,
        player: &PlayerId,
        query: &ListQuery,
    ) -> Result<Vec<MatchId>, ApiError>;

    async fn match_detail(
        &self,
        region: Region,
        match_id: &MatchId,
    ) -> Result<serde_json::Value, ApiError>;

    /// Timeline payload, `None` when the upstream has no timeline for the
    /// match (which is partial success, not an error).
    async fn match_timeline(
        &self,
        region: Region,
        match_id: &MatchId,
    ) -> Result<Option<serde_json::Value>, ApiError>;
}

/// Document storage writer with idempotent overwrite semantics.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn put(
        &self,
        key: &PartitionKey,
        kind: DocumentKind,
        payload: &serde_json::Value,
    ) -> Result<(), SinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Waiting.is_terminal());
        assert!(!JobState::Active.is_terminal());
        assert!(!JobState::Delayed.is_terminal());
    }
}
