//! # Job Definitions
//!
//! Typed payloads for the two queue-backed stages, plus the deterministic
//! queue identities that drive deduplication. Payloads are self-contained:
//! a worker needs nothing beyond the payload and its injected ports to
//! process a job.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::identity::RootId;
use crate::domain::types::{MatchId, PlayerId, QueueType, Region, Season};

/// Named queues the pipeline enqueues into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueName {
    /// List-stage jobs: one page of match-id listing.
    ListPages,
    /// Fetch-stage jobs: one match detail + timeline fetch.
    MatchFetch,
}

impl QueueName {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ListPages => "list-pages",
            Self::MatchFetch => "match-fetch",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to crawl all of one player's matches for one season.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Logical scope of the scan, part of the root-id derivation
    /// (e.g. `season-rewind`).
    pub scope: String,
    pub region: Region,
    pub player: PlayerId,
    pub season: Season,
    pub queue_types: Vec<QueueType>,
}

impl ScanRequest {
    /// The deterministic identity all descendant jobs carry as `root_id`.
    #[must_use]
    pub fn root_id(&self) -> RootId {
        RootId::derive(&self.scope, self.region, &self.player)
    }
}

/// One page of match-id listing for one queue type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListPageJob {
    pub root_id: RootId,
    pub region: Region,
    pub player: PlayerId,
    pub queue_type: QueueType,
    pub season: Season,
    pub offset: u32,
}

impl ListPageJob {
    /// Queue identity for this job. Only the first page carries a dedup key:
    /// later offsets are one-shot advances produced by exactly one
    /// predecessor page and may enqueue freely.
    #[must_use]
    pub fn dedup_id(&self) -> Option<String> {
        (self.offset == 0).then(|| {
            first_page_job_id(self.region, &self.player, self.queue_type)
        })
    }

    /// The follow-up job for the next page of the same listing.
    #[must_use]
    pub fn next_page(&self, page_size: u32) -> Self {
        Self {
            offset: self.offset + page_size,
            ..self.clone()
        }
    }
}

/// Queue identity of the page-0 list job for (region, player, queue type).
#[must_use]
pub fn first_page_job_id(region: Region, player: &PlayerId, queue_type: QueueType) -> String {
    format!("list:{}:{}:{}:0", region, player, queue_type.queue_id())
}

/// Fetch-and-persist work for a single match.
///
/// The queue identity is the match id itself, which is what makes fetch
/// dedup global: two scans encountering the same match share one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchMatchJob {
    pub root_id: RootId,
    pub region: Region,
    pub season: Season,
    pub match_id: MatchId,
}

/// Tagged union carried on the wire by the job queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum JobPayload {
    ListPage(ListPageJob),
    FetchMatch(FetchMatchJob),
}

impl JobPayload {
    /// Back-reference to the originating scan.
    #[must_use]
    pub fn root_id(&self) -> &RootId {
        match self {
            Self::ListPage(job) => &job.root_id,
            Self::FetchMatch(job) => &job.root_id,
        }
    }

    /// Short job kind for telemetry.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ListPage(_) => "list-page",
            Self::FetchMatch(_) => "fetch-match",
        }
    }
}
