//! Runs a full scan against the real upstream API with the in-memory queue
//! runtime and the SQLite document store, polling progress until the scan
//! reaches `ready`.
//!
//! Usage: `rewind-scan <region> <puuid> <season-year> [queue_type...]`
//! The API key comes from configuration (`REWIND_UPSTREAM__API_KEY`).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::info;

use rewind_crawler::crawl::completion::CompletionDetector;
use rewind_crawler::crawl::jobs::{QueueName, ScanRequest};
use rewind_crawler::crawl::workers::{FetchStageWorker, ListStageWorker};
use rewind_crawler::domain::types::{PlayerId, QueueType, Region, Season};
use rewind_crawler::infrastructure::config::AppConfig;
use rewind_crawler::infrastructure::http_client::MatchApiClient;
use rewind_crawler::infrastructure::logging::init_logging;
use rewind_crawler::infrastructure::memory_queue::{InMemoryJobQueue, WorkerHost};
use rewind_crawler::infrastructure::memory_store::InMemoryProgressStore;
use rewind_crawler::infrastructure::SqliteDocumentStore;
use rewind_crawler::{ProgressTracker, RewindOrchestrator, ScanState};

fn parse_args() -> Result<ScanRequest> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 3 {
        bail!("usage: rewind-scan <region> <puuid> <season-year> [queue_type...]");
    }

    let region: Region = args[0].parse().context("bad region")?;
    let player = PlayerId::new(args[1].clone());
    let season = Season::new(args[2].parse().context("bad season year")?);
    let queue_types = if args.len() > 3 {
        args[3..]
            .iter()
            .map(|raw| raw.parse().context("bad queue type"))
            .collect::<Result<Vec<QueueType>>>()?
    } else {
        QueueType::ALL.to_vec()
    };

    Ok(ScanRequest {
        scope: "season-rewind".to_string(),
        region,
        player,
        season,
        queue_types,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load(None)?;
    init_logging(&config.logging)?;
    let request = parse_args()?;

    let api = Arc::new(MatchApiClient::new(config.upstream.clone())?);
    let sink = Arc::new(SqliteDocumentStore::connect(&config.storage.database_url).await?);
    let queue = Arc::new(InMemoryJobQueue::new());
    let progress = ProgressTracker::new(
        Arc::new(InMemoryProgressStore::new()),
        config.crawl.progress_ttl(),
    );
    let detector = CompletionDetector::new(queue.clone(), progress.clone());
    let orchestrator = RewindOrchestrator::new(queue.clone(), progress.clone());

    let list_worker = Arc::new(ListStageWorker::new(
        api.clone(),
        queue.clone(),
        progress.clone(),
        detector.clone(),
        config.crawl.list_tuning(),
    ));
    let fetch_worker = Arc::new(FetchStageWorker::new(
        api,
        sink.clone(),
        progress.clone(),
        detector,
        config.crawl.fetch_tuning(),
    ));

    let list_host = WorkerHost::new(
        queue.clone(),
        QueueName::ListPages,
        list_worker,
        config.crawl.list_host(),
    )
    .spawn();
    let fetch_host = WorkerHost::new(
        queue.clone(),
        QueueName::MatchFetch,
        fetch_worker,
        config.crawl.fetch_host(),
    )
    .spawn();

    let root = orchestrator.start_scan(request).await?;
    info!(root = %root, "scan started, polling progress");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
            () = tokio::time::sleep(Duration::from_secs(2)) => {
                let Some(snapshot) = progress.snapshot(&root).await? else {
                    bail!("progress record vanished (TTL expiry?)");
                };
                info!(
                    state = snapshot.state.as_str(),
                    ids_found = snapshot.ids_found,
                    matches_fetched = snapshot.matches_fetched,
                    timelines_fetched = snapshot.timelines_fetched,
                    open_pages = snapshot.open_pages,
                    open_fetch = snapshot.open_fetch,
                    "progress"
                );
                if snapshot.state == ScanState::Ready {
                    break;
                }
            }
        }
    }

    list_host.shutdown().await;
    fetch_host.shutdown().await;

    let stored = sink.document_count().await?;
    info!(documents = stored, "scan finished");
    Ok(())
}
