//! # Distributed Progress Accounting
//!
//! One progress record per scan, held in the shared store and mutated only
//! through atomic field operations. The two in-flight counters
//! (`open_pages`, `open_fetch`) live on plain keys beside the record; they
//! are incremented strictly before the corresponding enqueue and
//! decremented after the job finishes, so a counter can transiently
//! over-report in-flight work (delaying `ready`) but never under-report it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::crawl::jobs::ScanRequest;
use crate::crawl::ports::{ProgressStore, StoreError};
use crate::domain::identity::RootId;
use crate::domain::types::QueueType;

const F_STATE: &str = "state";
const F_IDS_FOUND: &str = "ids_found";
const F_MATCHES_FETCHED: &str = "matches_fetched";
const F_TIMELINES_FETCHED: &str = "timelines_fetched";
const F_UPDATED_AT: &str = "updated_at";
const F_RATE_LIMITED_UNTIL: &str = "rate_limited_until";

fn page_field(queue_type: QueueType) -> String {
    format!("pages:{}", queue_type.queue_id())
}

/// Scan lifecycle. `Processing` is part of the documented state machine but
/// no code path sets it; `Ready` is the only observed transition out of
/// `Listing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    Listing,
    Processing,
    Ready,
}

impl ScanState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Listing => "listing",
            Self::Processing => "processing",
            Self::Ready => "ready",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "listing" => Some(Self::Listing),
            "processing" => Some(Self::Processing),
            "ready" => Some(Self::Ready),
            _ => None,
        }
    }
}

/// Read-side snapshot of a scan's progress, for status polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub state: ScanState,
    /// Pages listed so far, keyed by upstream queue id.
    pub pages: BTreeMap<u16, u64>,
    pub ids_found: u64,
    pub matches_fetched: u64,
    pub timelines_fetched: u64,
    pub open_pages: i64,
    pub open_fetch: i64,
    pub updated_at: Option<DateTime<Utc>>,
    /// Epoch seconds until which the upstream advised backing off, if a
    /// rate limit was hit recently.
    pub rate_limited_until: Option<i64>,
}

/// Progress-store facade owning the key scheme and TTL policy.
#[derive(Clone)]
pub struct ProgressTracker {
    store: Arc<dyn ProgressStore>,
    ttl: Duration,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(store: Arc<dyn ProgressStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn progress_key(root: &RootId) -> String {
        format!("rewind:{root}")
    }

    fn open_pages_key(root: &RootId) -> String {
        format!("rewind:{root}:open_pages")
    }

    fn open_fetch_key(root: &RootId) -> String {
        format!("rewind:{root}:open_fetch")
    }

    fn request_key(root: &RootId) -> String {
        format!("rewind:{root}:request")
    }

    /// Initializes a fresh record in `listing` state with zeroed counters
    /// and stores the side mapping back to the originating request, both
    /// under the retention TTL.
    pub async fn init(&self, root: &RootId, request: &ScanRequest) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let mut fields: Vec<(&str, String)> = vec![
            (F_STATE, ScanState::Listing.as_str().to_string()),
            (F_IDS_FOUND, "0".to_string()),
            (F_MATCHES_FETCHED, "0".to_string()),
            (F_TIMELINES_FETCHED, "0".to_string()),
            (F_UPDATED_AT, now),
        ];
        let page_fields: Vec<(String, String)> = request
            .queue_types
            .iter()
            .map(|qt| (page_field(*qt), "0".to_string()))
            .collect();
        fields.extend(page_fields.iter().map(|(k, v)| (k.as_str(), v.clone())));

        let key = Self::progress_key(root);
        self.store.hset(&key, &fields).await?;
        self.store.expire(&key, self.ttl).await?;

        let encoded = serde_json::to_string(request)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.store
            .set_with_ttl(&Self::request_key(root), encoded, self.ttl)
            .await?;

        debug!(root = %root, "initialized progress record");
        Ok(())
    }

    /// The originating request for a root id, while its TTL lives.
    pub async fn request_for(&self, root: &RootId) -> Result<Option<ScanRequest>, StoreError> {
        let Some(raw) = self.store.get(&Self::request_key(root)).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    pub async fn state(&self, root: &RootId) -> Result<Option<ScanState>, StoreError> {
        let fields = self.store.hget_all(&Self::progress_key(root)).await?;
        Ok(fields.get(F_STATE).and_then(|s| ScanState::parse(s)))
    }

    pub async fn incr_open_pages(&self, root: &RootId) -> Result<i64, StoreError> {
        self.store.incr(&Self::open_pages_key(root), 1).await
    }

    pub async fn decr_open_pages(&self, root: &RootId) -> Result<i64, StoreError> {
        self.store.incr(&Self::open_pages_key(root), -1).await
    }

    pub async fn incr_open_fetch(&self, root: &RootId) -> Result<i64, StoreError> {
        self.store.incr(&Self::open_fetch_key(root), 1).await
    }

    pub async fn decr_open_fetch(&self, root: &RootId) -> Result<i64, StoreError> {
        self.store.incr(&Self::open_fetch_key(root), -1).await
    }

    pub async fn open_pages(&self, root: &RootId) -> Result<i64, StoreError> {
        self.read_counter(&Self::open_pages_key(root)).await
    }

    pub async fn open_fetch(&self, root: &RootId) -> Result<i64, StoreError> {
        self.read_counter(&Self::open_fetch_key(root)).await
    }

    async fn read_counter(&self, key: &str) -> Result<i64, StoreError> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(0);
        };
        raw.parse()
            .map_err(|_| StoreError::NotANumber { key: key.to_string() })
    }

    /// Records a successfully listed page: bumps the queue-type page counter
    /// and the cumulative ids-found count, then refreshes freshness and TTL.
    pub async fn record_page_listed(
        &self,
        root: &RootId,
        queue_type: QueueType,
        ids_found: u64,
    ) -> Result<(), StoreError> {
        let key = Self::progress_key(root);
        self.store.hincr(&key, &page_field(queue_type), 1).await?;
        self.store
            .hincr(&key, F_IDS_FOUND, ids_found as i64)
            .await?;
        self.touch(root).await
    }

    /// Idempotent credit for a match whose fetch job already completed
    /// elsewhere: counts it as fetched without spawning a duplicate job.
    pub async fn credit_indexed_match(&self, root: &RootId) -> Result<(), StoreError> {
        let key = Self::progress_key(root);
        self.store.hincr(&key, F_MATCHES_FETCHED, 1).await?;
        self.store.hincr(&key, F_TIMELINES_FETCHED, 1).await?;
        self.touch(root).await
    }

    /// Records a completed fetch: the match always counts, the timeline
    /// only when frames were actually present.
    pub async fn record_match_fetched(
        &self,
        root: &RootId,
        timeline_stored: bool,
    ) -> Result<(), StoreError> {
        let key = Self::progress_key(root);
        self.store.hincr(&key, F_MATCHES_FETCHED, 1).await?;
        if timeline_stored {
            self.store.hincr(&key, F_TIMELINES_FETCHED, 1).await?;
        }
        self.touch(root).await
    }

    /// Stores the upstream's advised backoff horizon on the record so
    /// operators can see why a scan is stalling.
    pub async fn note_rate_limited(
        &self,
        root: &RootId,
        retry_after: Duration,
    ) -> Result<(), StoreError> {
        let until = Utc::now().timestamp() + retry_after.as_secs() as i64;
        self.store
            .hset(&Self::progress_key(root), &[(F_RATE_LIMITED_UNTIL, until.to_string())])
            .await?;
        self.touch(root).await
    }

    /// Refreshes `updated_at` and resets the retention TTL on the record
    /// and both in-flight counters.
    pub async fn touch(&self, root: &RootId) -> Result<(), StoreError> {
        let key = Self::progress_key(root);
        self.store
            .hset(&key, &[(F_UPDATED_AT, Utc::now().to_rfc3339())])
            .await?;
        self.store.expire(&key, self.ttl).await?;
        self.store
            .expire(&Self::open_pages_key(root), self.ttl)
            .await?;
        self.store
            .expire(&Self::open_fetch_key(root), self.ttl)
            .await?;
        Ok(())
    }

    /// Flips the scan to its terminal `ready` state.
    pub async fn mark_ready(&self, root: &RootId) -> Result<(), StoreError> {
        let key = Self::progress_key(root);
        self.store
            .hset(
                &key,
                &[
                    (F_STATE, ScanState::Ready.as_str().to_string()),
                    (F_UPDATED_AT, Utc::now().to_rfc3339()),
                ],
            )
            .await?;
        self.store.expire(&key, self.ttl).await
    }

    /// Full typed snapshot, `None` when the record expired or never existed.
    pub async fn snapshot(&self, root: &RootId) -> Result<Option<ProgressRecord>, StoreError> {
        let fields = self.store.hget_all(&Self::progress_key(root)).await?;
        let Some(state) = fields.get(F_STATE).and_then(|s| ScanState::parse(s)) else {
            return Ok(None);
        };

        let read = |name: &str| fields.get(name).and_then(|v| v.parse::<u64>().ok());
        let mut pages = BTreeMap::new();
        for (field, value) in &fields {
            if let Some(qid) = field.strip_prefix("pages:") {
                if let (Ok(qid), Ok(count)) = (qid.parse::<u16>(), value.parse::<u64>()) {
                    pages.insert(qid, count);
                }
            }
        }

        Ok(Some(ProgressRecord {
            state,
            pages,
            ids_found: read(F_IDS_FOUND).unwrap_or(0),
            matches_fetched: read(F_MATCHES_FETCHED).unwrap_or(0),
            timelines_fetched: read(F_TIMELINES_FETCHED).unwrap_or(0),
            open_pages: self.open_pages(root).await?,
            open_fetch: self.open_fetch(root).await?,
            updated_at: fields
                .get(F_UPDATED_AT)
                .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            rate_limited_until: fields
                .get(F_RATE_LIMITED_UNTIL)
                .and_then(|v| v.parse().ok()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{PlayerId, Region, Season};
    use crate::infrastructure::memory_store::InMemoryProgressStore;

    fn tracker() -> ProgressTracker {
        ProgressTracker::new(
            Arc::new(InMemoryProgressStore::new()),
            Duration::from_secs(7 * 24 * 3600),
        )
    }

    fn request() -> ScanRequest {
        ScanRequest {
            scope: "season-rewind".to_string(),
            region: Region::Americas,
            player: PlayerId::new("puuid-1"),
            season: Season::new(2024),
            queue_types: vec![QueueType::RankedSolo, QueueType::RankedFlex],
        }
    }

    #[tokio::test]
    async fn init_produces_listing_snapshot() {
        let tracker = tracker();
        let req = request();
        let root = req.root_id();

        tracker.init(&root, &req).await.unwrap();
        let snap = tracker.snapshot(&root).await.unwrap().unwrap();

        assert_eq!(snap.state, ScanState::Listing);
        assert_eq!(snap.ids_found, 0);
        assert_eq!(snap.open_pages, 0);
        assert_eq!(snap.pages.get(&420), Some(&0));
        assert_eq!(snap.pages.get(&440), Some(&0));
        assert!(snap.updated_at.is_some());
    }

    #[tokio::test]
    async fn request_side_mapping_round_trips() {
        let tracker = tracker();
        let req = request();
        let root = req.root_id();

        tracker.init(&root, &req).await.unwrap();
        assert_eq!(tracker.request_for(&root).await.unwrap(), Some(req));
    }

    #[tokio::test]
    async fn counters_are_incremental_and_never_read_modify_write() {
        let tracker = tracker();
        let req = request();
        let root = req.root_id();
        tracker.init(&root, &req).await.unwrap();

        assert_eq!(tracker.incr_open_pages(&root).await.unwrap(), 1);
        assert_eq!(tracker.incr_open_pages(&root).await.unwrap(), 2);
        assert_eq!(tracker.decr_open_pages(&root).await.unwrap(), 1);
        assert_eq!(tracker.open_pages(&root).await.unwrap(), 1);

        tracker
            .record_page_listed(&root, QueueType::RankedSolo, 37)
            .await
            .unwrap();
        let snap = tracker.snapshot(&root).await.unwrap().unwrap();
        assert_eq!(snap.ids_found, 37);
        assert_eq!(snap.pages.get(&420), Some(&1));
    }

    #[tokio::test]
    async fn indexed_credit_counts_both_documents() {
        let tracker = tracker();
        let req = request();
        let root = req.root_id();
        tracker.init(&root, &req).await.unwrap();

        tracker.credit_indexed_match(&root).await.unwrap();
        tracker.record_match_fetched(&root, false).await.unwrap();

        let snap = tracker.snapshot(&root).await.unwrap().unwrap();
        assert_eq!(snap.matches_fetched, 2);
        assert_eq!(snap.timelines_fetched, 1);
    }

    #[tokio::test]
    async fn rate_limit_note_is_visible_in_snapshot() {
        let tracker = tracker();
        let req = request();
        let root = req.root_id();
        tracker.init(&root, &req).await.unwrap();

        tracker
            .note_rate_limited(&root, Duration::from_secs(120))
            .await
            .unwrap();
        let snap = tracker.snapshot(&root).await.unwrap().unwrap();
        let until = snap.rate_limited_until.expect("hint recorded");
        assert!(until > Utc::now().timestamp());
    }

    #[tokio::test]
    async fn expired_record_snapshots_as_none() {
        let store = Arc::new(InMemoryProgressStore::new());
        let tracker = ProgressTracker::new(store, Duration::ZERO);
        let req = request();
        let root = req.root_id();

        tracker.init(&root, &req).await.unwrap();
        assert!(tracker.snapshot(&root).await.unwrap().is_none());
    }
}
