//! Infrastructure implementations of the crawl-layer ports plus the
//! ambient concerns (configuration, logging).

pub mod config;
pub mod document_store;
pub mod http_client;
pub mod logging;
pub mod memory_queue;
pub mod memory_store;

pub use config::AppConfig;
pub use document_store::SqliteDocumentStore;
pub use http_client::MatchApiClient;
pub use memory_queue::{InMemoryJobQueue, WorkerHost, WorkerHostConfig};
pub use memory_store::{InMemoryDocumentSink, InMemoryProgressStore};
