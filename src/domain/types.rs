//! # Domain Value Types
//!
//! Typed identifiers and classifiers for the match-history domain. Kept
//! deliberately small: everything here is either carried in job payloads or
//! used to derive storage partition keys, so all types are serde-friendly.

use std::fmt;
use std::str::FromStr;

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when parsing domain classifiers from strings.
#[derive(Debug, Error)]
pub enum DomainParseError {
    #[error("unknown region: {0}")]
    UnknownRegion(String),

    #[error("unknown queue type: {0}")]
    UnknownQueueType(String),
}

/// Regional routing value for the upstream match API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Americas,
    Europe,
    Asia,
    Sea,
}

impl Region {
    /// Routing host segment used by the upstream API.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Americas => "americas",
            Self::Europe => "europe",
            Self::Asia => "asia",
            Self::Sea => "sea",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = DomainParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "americas" => Ok(Self::Americas),
            "europe" => Ok(Self::Europe),
            "asia" => Ok(Self::Asia),
            "sea" => Ok(Self::Sea),
            other => Err(DomainParseError::UnknownRegion(other.to_string())),
        }
    }
}

/// Upstream game-mode classifier used to scope listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueType {
    RankedSolo,
    RankedFlex,
    NormalDraft,
}

impl QueueType {
    /// All queue types a scan may target.
    pub const ALL: [Self; 3] = [Self::RankedSolo, Self::RankedFlex, Self::NormalDraft];

    /// Numeric queue identifier used by the upstream API.
    #[must_use]
    pub const fn queue_id(self) -> u16 {
        match self {
            Self::RankedSolo => 420,
            Self::RankedFlex => 440,
            Self::NormalDraft => 400,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RankedSolo => "ranked_solo",
            Self::RankedFlex => "ranked_flex",
            Self::NormalDraft => "normal_draft",
        }
    }
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueType {
    type Err = DomainParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ranked_solo" | "420" => Ok(Self::RankedSolo),
            "ranked_flex" | "440" => Ok(Self::RankedFlex),
            "normal_draft" | "400" => Ok(Self::NormalDraft),
            other => Err(DomainParseError::UnknownQueueType(other.to_string())),
        }
    }
}

/// Stable upstream identity of a player (opaque, region-independent).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Upstream match identifier, e.g. `NA1_4567890123`.
///
/// Doubles as the global dedup key for fetch jobs: at most one live fetch
/// job per match exists system-wide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchId(String);

impl MatchId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Season of play, identified by its calendar year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Season(u16);

impl Season {
    #[must_use]
    pub const fn new(year: u16) -> Self {
        Self(year)
    }

    #[must_use]
    pub const fn year(self) -> u16 {
        self.0
    }

    /// Absolute start-of-season instant as epoch seconds: January 1st,
    /// 00:00:00 UTC of the season year.
    #[must_use]
    pub fn start_epoch_secs(self) -> i64 {
        Utc.with_ymd_and_hms(i32::from(self.0), 1, 1, 0, 0, 0)
            .single()
            .map_or(0, |dt| dt.timestamp())
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which document of a match a storage write carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Match,
    Timeline,
}

impl DocumentKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Match => "match",
            Self::Timeline => "timeline",
        }
    }
}

/// Storage partition key: (season, patch bucket, queue id, match id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionKey {
    pub season: Season,
    pub patch_bucket: String,
    pub queue_id: u16,
    pub match_id: MatchId,
}

impl PartitionKey {
    /// Derives the key from a match detail payload. Patch bucket and queue
    /// id come from the payload's `info` block; missing fields fall back to
    /// a sentinel bucket so a malformed payload still lands somewhere
    /// inspectable.
    #[must_use]
    pub fn for_match(season: Season, match_id: &MatchId, detail: &serde_json::Value) -> Self {
        let info = &detail["info"];
        let patch_bucket = info["gameVersion"]
            .as_str()
            .map_or_else(|| "unknown".to_string(), patch_bucket);
        let queue_id = info["queueId"].as_u64().map_or(0, |q| q as u16);

        Self {
            season,
            patch_bucket,
            queue_id,
            match_id: match_id.clone(),
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "s{}/{}/q{}/{}",
            self.season, self.patch_bucket, self.queue_id, self.match_id
        )
    }
}

/// Coarse version-grouping key: the first two components of a full game
/// version string, e.g. `14.3.561.2315` -> `14.3`.
#[must_use]
pub fn patch_bucket(game_version: &str) -> String {
    let mut parts = game_version.splitn(3, '.');
    match (parts.next(), parts.next()) {
        (Some(major), Some(minor)) if !major.is_empty() && !minor.is_empty() => {
            format!("{major}.{minor}")
        }
        _ => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(QueueType::RankedSolo, 420, "ranked_solo")]
    #[case(QueueType::RankedFlex, 440, "ranked_flex")]
    #[case(QueueType::NormalDraft, 400, "normal_draft")]
    fn queue_type_mapping(#[case] qt: QueueType, #[case] id: u16, #[case] name: &str) {
        assert_eq!(qt.queue_id(), id);
        assert_eq!(qt.as_str(), name);
        assert_eq!(name.parse::<QueueType>().unwrap(), qt);
    }

    #[test]
    fn queue_type_parses_numeric_ids() {
        assert_eq!("420".parse::<QueueType>().unwrap(), QueueType::RankedSolo);
        assert!("9999".parse::<QueueType>().is_err());
    }

    #[test]
    fn season_start_is_january_first_utc() {
        let season = Season::new(2024);
        // 2024-01-01T00:00:00Z
        assert_eq!(season.start_epoch_secs(), 1_704_067_200);
    }

    #[rstest]
    #[case("14.3.561.2315", "14.3")]
    #[case("13.24.1", "13.24")]
    #[case("garbage", "unknown")]
    #[case("", "unknown")]
    fn patch_bucket_derivation(#[case] version: &str, #[case] expected: &str) {
        assert_eq!(patch_bucket(version), expected);
    }

    #[test]
    fn partition_key_from_match_payload() {
        let detail = serde_json::json!({
            "info": { "gameVersion": "14.3.561.2315", "queueId": 420 }
        });
        let key = PartitionKey::for_match(
            Season::new(2024),
            &MatchId::new("NA1_4567890123"),
            &detail,
        );
        assert_eq!(key.to_string(), "s2024/14.3/q420/NA1_4567890123");
    }

    #[test]
    fn partition_key_tolerates_malformed_payload() {
        let key = PartitionKey::for_match(
            Season::new(2024),
            &MatchId::new("NA1_1"),
            &serde_json::json!({}),
        );
        assert_eq!(key.patch_bucket, "unknown");
        assert_eq!(key.queue_id, 0);
    }
}
