//! Rewind Crawler - match-history ingestion pipeline
//!
//! Ingests a player's historical match data from a rate-limited upstream
//! game-data API in two stages: list match identifiers page by page, then
//! fetch and persist each match's full data and timeline. The crate owns the
//! orchestration layer (job fan-out/fan-in, deduplication, progress
//! accounting, completion detection); the durable job queue, the upstream
//! API and the document storage are reached through the ports in
//! [`crawl::ports`].

// Module declarations
pub mod crawl;
pub mod domain;
pub mod infrastructure;

// Re-export the primary entry points for easier access
pub use crawl::orchestrator::RewindOrchestrator;
pub use crawl::progress::{ProgressRecord, ProgressTracker, ScanState};
pub use domain::identity::RootId;

#[cfg(test)]
pub(crate) mod testkit;
