//! HTTP client for the upstream match API with rate limiting and
//! rate-limit-aware error mapping.
//!
//! The upstream enforces strict quotas and signals throttling with a 429
//! plus a `Retry-After` hint; that class is mapped to its own error variant
//! so workers can surface it for queue-level backoff instead of burning an
//! attempt.

use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, StatusCode};
use url::Url;

use crate::crawl::ports::{ApiError, ListQuery, MatchApi};
use crate::domain::types::{MatchId, PlayerId, Region};

/// Header carrying the upstream API key.
const API_KEY_HEADER: &str = "X-Riot-Token";

/// Backoff applied when the upstream throttles without a usable hint.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ApiClientConfig {
    pub api_key: String,
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_requests_per_second: u32,
    /// Routing hosts are `{region}.{base_domain}`.
    pub base_domain: String,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            user_agent: "rewind-crawler/0.2".to_string(),
            timeout_seconds: 30,
            max_requests_per_second: 5,
            base_domain: "api.riotgames.com".to_string(),
        }
    }
}

/// Upstream API client wrapping reqwest with a direct rate limiter.
pub struct MatchApiClient {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    config: ApiClientConfig,
}

impl MatchApiClient {
    pub fn new(config: ApiClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("invalid user agent")?,
        );
        if !config.api_key.is_empty() {
            let mut key = HeaderValue::from_str(&config.api_key).context("invalid API key")?;
            key.set_sensitive(true);
            headers.insert(API_KEY_HEADER, key);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .build()
            .context("failed to create HTTP client")?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second)
                .context("rate limit must be greater than 0")?,
        );
        let rate_limiter = RateLimiter::direct(quota);

        Ok(Self {
            client,
            rate_limiter,
            config,
        })
    }

    fn region_base(&self, region: Region) -> String {
        format!("https://{}.{}", region.as_str(), self.config.base_domain)
    }

    async fn get_json(&self, url: Url) -> Result<serde_json::Value, ApiError> {
        self.rate_limiter.until_ready().await;

        tracing::debug!(url = %url, "upstream request");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(response.headers().get(RETRY_AFTER));
            return Err(ApiError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

/// Parses the upstream's advised delay, falling back to a short default
/// when the header is absent or unreadable.
fn parse_retry_after(header: Option<&HeaderValue>) -> Duration {
    header
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map_or(DEFAULT_RETRY_AFTER, Duration::from_secs)
}

fn parse_url(raw: &str) -> Result<Url, ApiError> {
    Url::parse(raw).map_err(|e| ApiError::Network(format!("invalid URL '{raw}': {e}")))
}

#[async_trait]
impl MatchApi for MatchApiClient {
    async fn list_match_ids(
        &self,
        region: Region,
        player: &PlayerId,
        query: &ListQuery,
    ) -> Result<Vec<MatchId>, ApiError> {
        let raw = format!(
            "{}/lol/match/v5/matches/by-puuid/{}/ids",
            self.region_base(region),
            player
        );
        let mut url = parse_url(&raw)?;
        url.query_pairs_mut()
            .append_pair("start", &query.start.to_string())
            .append_pair("count", &query.count.to_string())
            .append_pair("queue", &query.queue.queue_id().to_string())
            .append_pair("startTime", &query.start_time.to_string());

        let payload = self.get_json(url).await?;
        let ids = payload
            .as_array()
            .ok_or_else(|| ApiError::Decode("expected an array of match ids".to_string()))?
            .iter()
            .map(|value| {
                value
                    .as_str()
                    .map(MatchId::new)
                    .ok_or_else(|| ApiError::Decode("non-string match id".to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    async fn match_detail(
        &self,
        region: Region,
        match_id: &MatchId,
    ) -> Result<serde_json::Value, ApiError> {
        let raw = format!(
            "{}/lol/match/v5/matches/{}",
            self.region_base(region),
            match_id
        );
        self.get_json(parse_url(&raw)?).await
    }

    async fn match_timeline(
        &self,
        region: Region,
        match_id: &MatchId,
    ) -> Result<Option<serde_json::Value>, ApiError> {
        let raw = format!(
            "{}/lol/match/v5/matches/{}/timeline",
            self.region_base(region),
            match_id
        );
        match self.get_json(parse_url(&raw)?).await {
            Ok(payload) => Ok(Some(payload)),
            // A match without a timeline is expected, not an error
            Err(ApiError::Upstream { status: 404, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
