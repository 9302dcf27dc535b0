//! Configuration infrastructure
//!
//! Layered application configuration: compiled defaults, an optional JSON
//! config file, then `REWIND_`-prefixed environment overrides (e.g.
//! `REWIND_UPSTREAM__API_KEY`, `REWIND_CRAWL__FETCH_CONCURRENCY`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::crawl::workers::{FetchStageTuning, ListStageTuning};
use crate::infrastructure::http_client::ApiClientConfig;
use crate::infrastructure::memory_queue::WorkerHostConfig;

/// Compiled-in defaults, one place to read the pipeline's shape from.
pub mod defaults {
    /// Upstream page cap for match-id listing.
    pub const PAGE_SIZE: u32 = 100;

    /// List stage serializes all page fetches system-wide.
    pub const LIST_CONCURRENCY: usize = 1;
    pub const LIST_RATE_PER_SEC: u32 = 1;

    /// Fetch stage runs a small fixed pool behind its own quota.
    pub const FETCH_CONCURRENCY: usize = 2;
    pub const FETCH_RATE_PER_SEC: u32 = 5;

    /// Pause between the detail and timeline requests of one fetch.
    pub const TIMELINE_DELAY_MS: u64 = 250;

    /// Retention window of progress records and counters.
    pub const PROGRESS_TTL_SECS: u64 = 7 * 24 * 3600;

    pub const MAX_ATTEMPTS: u32 = 3;
    pub const RETRY_DELAY_MS: u64 = 1000;

    pub const DATABASE_URL: &str = "sqlite://rewind.db";
    pub const LOG_LEVEL: &str = "info";
}

/// Crawl pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlSettings {
    pub page_size: u32,
    pub list_concurrency: usize,
    pub list_rate_per_sec: u32,
    pub fetch_concurrency: usize,
    pub fetch_rate_per_sec: u32,
    pub timeline_delay_ms: u64,
    pub progress_ttl_secs: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            page_size: defaults::PAGE_SIZE,
            list_concurrency: defaults::LIST_CONCURRENCY,
            list_rate_per_sec: defaults::LIST_RATE_PER_SEC,
            fetch_concurrency: defaults::FETCH_CONCURRENCY,
            fetch_rate_per_sec: defaults::FETCH_RATE_PER_SEC,
            timeline_delay_ms: defaults::TIMELINE_DELAY_MS,
            progress_ttl_secs: defaults::PROGRESS_TTL_SECS,
            max_attempts: defaults::MAX_ATTEMPTS,
            retry_delay_ms: defaults::RETRY_DELAY_MS,
        }
    }
}

impl CrawlSettings {
    #[must_use]
    pub fn progress_ttl(&self) -> Duration {
        Duration::from_secs(self.progress_ttl_secs)
    }

    #[must_use]
    pub fn list_tuning(&self) -> ListStageTuning {
        ListStageTuning {
            page_size: self.page_size,
        }
    }

    #[must_use]
    pub fn fetch_tuning(&self) -> FetchStageTuning {
        FetchStageTuning {
            timeline_delay: Duration::from_millis(self.timeline_delay_ms),
        }
    }

    #[must_use]
    pub fn list_host(&self) -> WorkerHostConfig {
        WorkerHostConfig {
            concurrency: self.list_concurrency,
            rate_per_sec: self.list_rate_per_sec,
            max_attempts: self.max_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    #[must_use]
    pub fn fetch_host(&self) -> WorkerHostConfig {
        WorkerHostConfig {
            concurrency: self.fetch_concurrency,
            rate_per_sec: self.fetch_rate_per_sec,
            max_attempts: self.max_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub database_url: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_url: defaults::DATABASE_URL.to_string(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub console_output: bool,
    pub file_output: bool,
    /// Directory for rotated log files when `file_output` is set.
    pub directory: PathBuf,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            console_output: true,
            file_output: false,
            directory: PathBuf::from("logs"),
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub crawl: CrawlSettings,
    pub upstream: ApiClientConfig,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

impl AppConfig {
    /// Loads configuration from (in ascending precedence) compiled
    /// defaults, the config file, and `REWIND_` environment variables.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = explicit_path
            .map(Path::to_path_buf)
            .or_else(default_config_path);

        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path.as_path()).required(false));
        }
        builder = builder.add_source(
            Environment::with_prefix("REWIND")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .context("failed to assemble configuration")?
            .try_deserialize()
            .context("invalid configuration")
    }
}

/// Default config file location, e.g. `~/.config/rewind-crawler/config.json`.
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("rewind-crawler").join("config.json"))
}
