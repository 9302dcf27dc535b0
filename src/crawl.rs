//! # Crawl Orchestration Layer
//!
//! The two-stage crawl: a root orchestrator fans a scan request out into
//! list-page jobs, each list page fans out per-match fetch jobs and
//! re-enqueues itself for the next page, and a completion detector flips the
//! scan to `ready` once all fan-out work has drained. Coordination happens
//! exclusively through the external job queue and progress store reached via
//! [`ports`]; workers never block on one another directly.

pub mod completion;
pub mod jobs;
pub mod orchestrator;
pub mod ports;
pub mod progress;
pub mod workers;

pub use completion::CompletionDetector;
pub use jobs::{FetchMatchJob, JobPayload, ListPageJob, QueueName, ScanRequest};
pub use orchestrator::RewindOrchestrator;
pub use progress::{ProgressRecord, ProgressTracker, ScanState};
pub use workers::{FetchStageWorker, JobHandler, ListStageWorker, WorkerError};
