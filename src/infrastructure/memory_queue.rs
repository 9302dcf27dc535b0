//! # In-Memory Job Queue & Worker Runtime
//!
//! Reference implementation of the queue contract the orchestration layer
//! assumes: named queues with identity dedup, job-state inspection, and an
//! at-least-once worker pump with per-pool concurrency, a governor rate
//! limiter wrapping job execution, and attempt-counted exponential backoff.
//! Production deployments may substitute any runtime satisfying the same
//! contract; this one backs the tests and single-process runs.

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::crawl::jobs::{JobPayload, QueueName};
use crate::crawl::ports::{EnqueueOptions, JobQueue, JobRecord, JobState, QueueError};
use crate::crawl::workers::{JobHandler, WorkerError};

#[derive(Debug, Clone)]
struct JobEntry {
    payload: JobPayload,
    state: JobState,
    attempts: u32,
    run_at: Option<Instant>,
}

#[derive(Default)]
struct QueueShard {
    jobs: HashMap<String, JobEntry>,
    /// Ids still eligible for claiming, in enqueue order.
    pending: VecDeque<String>,
}

impl QueueShard {
    fn claim_next(&mut self) -> Option<(String, JobEntry)> {
        let now = Instant::now();
        let position = self.pending.iter().position(|id| {
            self.jobs.get(id).is_some_and(|entry| match entry.state {
                JobState::Waiting => true,
                JobState::Delayed => entry.run_at.is_none_or(|at| at <= now),
                _ => false,
            })
        })?;

        let id = self.pending.remove(position)?;
        let entry = self.jobs.get_mut(&id)?;
        entry.state = JobState::Active;
        entry.attempts += 1;
        entry.run_at = None;
        Some((id.clone(), entry.clone()))
    }
}

/// A job handed to the worker pump.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: String,
    pub payload: JobPayload,
    pub attempts: u32,
}

/// In-memory backend for the [`JobQueue`] port.
#[derive(Default)]
pub struct InMemoryJobQueue {
    shards: Mutex<HashMap<QueueName, QueueShard>>,
}

impl InMemoryJobQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_shard<T>(&self, queue: QueueName, f: impl FnOnce(&mut QueueShard) -> T) -> T {
        let mut shards = self.shards.lock().expect("queue lock poisoned");
        f(shards.entry(queue).or_default())
    }

    /// Claims the next runnable job, marking it active and counting the
    /// attempt. `None` when nothing is currently due.
    pub async fn claim_next(&self, queue: QueueName) -> Option<ClaimedJob> {
        self.with_shard(queue, |shard| {
            shard.claim_next().map(|(id, entry)| ClaimedJob {
                id,
                payload: entry.payload,
                attempts: entry.attempts,
            })
        })
    }

    pub async fn mark_completed(&self, queue: QueueName, job_id: &str) {
        self.with_shard(queue, |shard| {
            if let Some(entry) = shard.jobs.get_mut(job_id) {
                entry.state = JobState::Completed;
            }
        });
    }

    pub async fn mark_failed(&self, queue: QueueName, job_id: &str) {
        self.with_shard(queue, |shard| {
            if let Some(entry) = shard.jobs.get_mut(job_id) {
                entry.state = JobState::Failed;
            }
        });
    }

    /// Requeues after an upstream rate limit: delayed by the advised
    /// duration, and the attempt is handed back since the job never really
    /// ran.
    pub async fn requeue_rate_limited(&self, queue: QueueName, job_id: &str, delay: Duration) {
        self.with_shard(queue, |shard| {
            if let Some(entry) = shard.jobs.get_mut(job_id) {
                entry.state = JobState::Delayed;
                entry.run_at = Some(Instant::now() + delay);
                entry.attempts = entry.attempts.saturating_sub(1);
                shard.pending.push_back(job_id.to_string());
            }
        });
    }

    /// Schedules a failed attempt's retry.
    pub async fn retry_later(&self, queue: QueueName, job_id: &str, delay: Duration) {
        self.with_shard(queue, |shard| {
            if let Some(entry) = shard.jobs.get_mut(job_id) {
                entry.state = JobState::Delayed;
                entry.run_at = Some(Instant::now() + delay);
                shard.pending.push_back(job_id.to_string());
            }
        });
    }

    /// Seeds a terminal entry directly, for tests exercising the dedup
    /// rules around completed/failed job identities.
    #[cfg(test)]
    pub async fn seed_terminal(&self, queue: QueueName, job_id: &str, state: JobState) {
        use crate::crawl::jobs::FetchMatchJob;
        use crate::domain::identity::RootId;
        use crate::domain::types::{MatchId, Region, Season};

        assert!(state.is_terminal(), "seed_terminal takes terminal states");
        let payload = JobPayload::FetchMatch(FetchMatchJob {
            root_id: RootId::from_string("seeded"),
            region: Region::Americas,
            season: Season::new(0),
            match_id: MatchId::new(job_id),
        });
        self.with_shard(queue, |shard| {
            shard.jobs.insert(
                job_id.to_string(),
                JobEntry {
                    payload,
                    state,
                    attempts: 1,
                    run_at: None,
                },
            );
        });
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(
        &self,
        queue: QueueName,
        payload: JobPayload,
        opts: EnqueueOptions,
    ) -> Result<(), QueueError> {
        self.with_shard(queue, |shard| {
            let id = match opts.job_id {
                Some(id) => {
                    if shard.jobs.contains_key(&id) {
                        // Identity already taken, in whatever state: dedup no-op
                        debug!(queue = %queue, job_id = %id, "duplicate enqueue ignored");
                        return;
                    }
                    id
                }
                None => Uuid::new_v4().to_string(),
            };

            let (state, run_at) = match opts.delay {
                Some(delay) => (JobState::Delayed, Some(Instant::now() + delay)),
                None => (JobState::Waiting, None),
            };
            shard.jobs.insert(
                id.clone(),
                JobEntry {
                    payload,
                    state,
                    attempts: 0,
                    run_at,
                },
            );
            shard.pending.push_back(id);
        });
        Ok(())
    }

    async fn job_state(
        &self,
        queue: QueueName,
        job_id: &str,
    ) -> Result<Option<JobState>, QueueError> {
        Ok(self.with_shard(queue, |shard| shard.jobs.get(job_id).map(|e| e.state)))
    }

    async fn remove(&self, queue: QueueName, job_id: &str) -> Result<(), QueueError> {
        self.with_shard(queue, |shard| {
            shard.jobs.remove(job_id);
            shard.pending.retain(|id| id != job_id);
        });
        Ok(())
    }

    async fn list_jobs(
        &self,
        queue: QueueName,
        states: &[JobState],
    ) -> Result<Vec<JobRecord>, QueueError> {
        Ok(self.with_shard(queue, |shard| {
            shard
                .jobs
                .iter()
                .filter(|(_, entry)| states.contains(&entry.state))
                .map(|(id, entry)| JobRecord {
                    id: id.clone(),
                    state: entry.state,
                    attempts: entry.attempts,
                    payload: entry.payload.clone(),
                })
                .collect()
        }))
    }
}

/// Tuning for one worker pump.
#[derive(Debug, Clone, Copy)]
pub struct WorkerHostConfig {
    pub concurrency: usize,
    /// Leaky-bucket quota wrapping job execution.
    pub rate_per_sec: u32,
    /// Attempts before a job lands in the failed set for good.
    pub max_attempts: u32,
    /// Base delay of the exponential retry backoff.
    pub retry_delay: Duration,
}

impl Default for WorkerHostConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            rate_per_sec: 1,
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Pulls jobs from one queue and drives a [`JobHandler`].
pub struct WorkerHost {
    queue: Arc<InMemoryJobQueue>,
    queue_name: QueueName,
    handler: Arc<dyn JobHandler>,
    config: WorkerHostConfig,
}

/// Handle to a spawned pump; shutting down waits for the loop to exit.
pub struct HostHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl HostHandle {
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

impl WorkerHost {
    #[must_use]
    pub fn new(
        queue: Arc<InMemoryJobQueue>,
        queue_name: QueueName,
        handler: Arc<dyn JobHandler>,
        config: WorkerHostConfig,
    ) -> Self {
        Self {
            queue,
            queue_name,
            handler,
            config,
        }
    }

    #[must_use]
    pub fn spawn(self) -> HostHandle {
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            run_pump(
                self.queue,
                self.queue_name,
                self.handler,
                self.config,
                loop_cancel,
            )
            .await;
        });
        HostHandle { cancel, handle }
    }
}

async fn run_pump(
    queue: Arc<InMemoryJobQueue>,
    queue_name: QueueName,
    handler: Arc<dyn JobHandler>,
    config: WorkerHostConfig,
    cancel: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let quota = Quota::per_second(NonZeroU32::new(config.rate_per_sec.max(1)).expect("nonzero"));
    let limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>> =
        Arc::new(RateLimiter::direct(quota));

    loop {
        let permit = tokio::select! {
            () = cancel.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let Some(claim) = queue.claim_next(queue_name).await else {
            drop(permit);
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(Duration::from_millis(20)) => {}
            }
            continue;
        };

        let queue = queue.clone();
        let handler = handler.clone();
        let limiter = limiter.clone();
        tokio::spawn(async move {
            let _permit = permit;
            limiter.until_ready().await;

            match handler.handle(claim.payload.clone()).await {
                Ok(()) => queue.mark_completed(queue_name, &claim.id).await,
                Err(WorkerError::RateLimited { retry_after }) => {
                    debug!(
                        queue = %queue_name,
                        job_id = %claim.id,
                        ?retry_after,
                        "rate limited, requeueing with advised delay"
                    );
                    queue
                        .requeue_rate_limited(queue_name, &claim.id, retry_after)
                        .await;
                }
                Err(err) if claim.attempts >= config.max_attempts => {
                    warn!(
                        queue = %queue_name,
                        job_id = %claim.id,
                        attempts = claim.attempts,
                        error = %err,
                        "job failed permanently"
                    );
                    queue.mark_failed(queue_name, &claim.id).await;
                    handler.on_final_failure(&claim.payload).await;
                }
                Err(err) => {
                    let backoff = retry_backoff(config.retry_delay, claim.attempts);
                    debug!(
                        queue = %queue_name,
                        job_id = %claim.id,
                        attempt = claim.attempts,
                        ?backoff,
                        error = %err,
                        "attempt failed, retrying"
                    );
                    queue.retry_later(queue_name, &claim.id, backoff).await;
                }
            }
        });
    }
}

/// Exponential backoff with jitter: base * 2^(attempt-1) plus up to half a
/// base of random smear so retries from parallel failures spread out.
fn retry_backoff(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(8);
    let scaled = base * 2_u32.pow(exponent);
    let jitter_ms = fastrand::u64(0..=(base.as_millis() as u64 / 2).max(1));
    scaled + Duration::from_millis(jitter_ms)
}
