//! Shared test doubles for the unit tests across modules.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::crawl::ports::{ApiError, ListQuery, MatchApi};
use crate::domain::types::{MatchId, PlayerId, QueueType, Region};

#[derive(Debug, Clone, Copy)]
enum TimelineMode {
    Frames,
    Empty,
    Missing,
}

/// Scripted upstream API: serves configured id pages, deterministic match
/// payloads, and optionally injects rate limits or transient failures.
pub struct FakeMatchApi {
    pages: HashMap<(QueueType, u32), Vec<MatchId>>,
    rate_limit: Option<Duration>,
    timeline_mode: TimelineMode,
    fail_detail_remaining: AtomicU32,
}

impl FakeMatchApi {
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            rate_limit: None,
            timeline_mode: TimelineMode::Frames,
            fail_detail_remaining: AtomicU32::new(0),
        }
    }

    /// Registers a page of `count` deterministic match ids at `offset`.
    pub fn with_page(mut self, queue_type: QueueType, offset: u32, count: usize) -> Self {
        let ids = (0..count)
            .map(|i| MatchId::new(format!("NA1_{}_{}", queue_type.queue_id(), offset as usize + i)))
            .collect();
        self.pages.insert((queue_type, offset), ids);
        self
    }

    /// Every list call fails with this advised delay.
    pub fn rate_limited(mut self, retry_after: Duration) -> Self {
        self.rate_limit = Some(retry_after);
        self
    }

    /// Timeline endpoint returns no data at all.
    pub fn without_timeline(mut self) -> Self {
        self.timeline_mode = TimelineMode::Missing;
        self
    }

    /// Timeline endpoint returns a payload with zero frames.
    pub fn with_empty_timeline(mut self) -> Self {
        self.timeline_mode = TimelineMode::Empty;
        self
    }

    /// The first `n` detail calls fail with an upstream 500.
    pub fn failing_detail(self, n: u32) -> Self {
        self.fail_detail_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// The ids a configured page serves, for assertions.
    pub fn page_ids(&self, queue_type: QueueType, offset: u32) -> Vec<MatchId> {
        self.pages
            .get(&(queue_type, offset))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl MatchApi for FakeMatchApi {
    async fn list_match_ids(
        &self,
        _region: Region,
        _player: &PlayerId,
        query: &ListQuery,
    ) -> Result<Vec<MatchId>, ApiError> {
        if let Some(retry_after) = self.rate_limit {
            return Err(ApiError::RateLimited { retry_after });
        }
        Ok(self.page_ids(query.queue, query.start))
    }

    async fn match_detail(
        &self,
        _region: Region,
        match_id: &MatchId,
    ) -> Result<serde_json::Value, ApiError> {
        if self
            .fail_detail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ApiError::Upstream {
                status: 500,
                message: "induced failure".to_string(),
            });
        }
        Ok(serde_json::json!({
            "metadata": { "matchId": match_id.as_str() },
            "info": { "gameVersion": "14.3.561.2315", "queueId": 420 }
        }))
    }

    async fn match_timeline(
        &self,
        _region: Region,
        match_id: &MatchId,
    ) -> Result<Option<serde_json::Value>, ApiError> {
        Ok(match self.timeline_mode {
            TimelineMode::Frames => Some(serde_json::json!({
                "metadata": { "matchId": match_id.as_str() },
                "info": { "frames": [ { "timestamp": 0 }, { "timestamp": 60000 } ] }
            })),
            TimelineMode::Empty => Some(serde_json::json!({
                "metadata": { "matchId": match_id.as_str() },
                "info": { "frames": [] }
            })),
            TimelineMode::Missing => None,
        })
    }
}
