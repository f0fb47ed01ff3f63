//! Warming worker pool (C8)
//!
//! A bounded queue of [`WarmTask`]s drained by `ConcurrentWarmers` worker
//! loops (grounded on `scheduling::worker::Worker::run_loop`'s spawned
//! fixed-size pool), each gated by a token-bucket rate limiter on origin
//! load in the style of the rate-limiting `TokenBucket` found elsewhere in
//! the example pack (atomic CAS refill), reimplemented here against
//! `tokio::time::Instant` so the bucket composes with async retry/backoff
//! rather than requiring a raw nanosecond clock read. Retry uses the same
//! `2^attempt` exponential backoff shape as
//! `scheduling::scheduler::Job::mark_failed`.

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::WarmingConfig;
use crate::error::WarmingError;
use crate::l1::Coalescer;
use crate::manager::adapters::OriginFetcher;
use crate::manager::CacheManager;
use crate::warming::strategy::WarmTask;

/// Lock-free token bucket limiting sustained origin request rate.
pub struct TokenBucket {
    capacity: u64,
    tokens: AtomicU64,
    refill_per_sec: f64,
    last_refill_nanos: AtomicU64,
    start: Instant,
}

impl TokenBucket {
    /// A bucket with `capacity` burst tokens refilling at `refill_per_sec`.
    pub fn new(capacity: u64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            tokens: AtomicU64::new(capacity),
            refill_per_sec,
            last_refill_nanos: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    fn now_nanos(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }

    fn refill(&self) {
        let now = self.now_nanos();
        let last = self.last_refill_nanos.load(Ordering::Acquire);
        let elapsed_secs = now.saturating_sub(last) as f64 / 1_000_000_000.0;
        let to_add = (elapsed_secs * self.refill_per_sec) as u64;
        if to_add > 0
            && self
                .last_refill_nanos
                .compare_exchange(last, now, Ordering::Release, Ordering::Acquire)
                .is_ok()
        {
            loop {
                let current = self.tokens.load(Ordering::Acquire);
                let updated = (current + to_add).min(self.capacity);
                if self
                    .tokens
                    .compare_exchange(current, updated, Ordering::Release, Ordering::Acquire)
                    .is_ok()
                {
                    break;
                }
            }
        }
    }

    /// Try to take one token. Returns `Ok(())` on success, or the
    /// duration until a token should next be available.
    pub fn try_take(&self) -> Result<(), Duration> {
        self.refill();
        loop {
            let current = self.tokens.load(Ordering::Acquire);
            if current == 0 {
                let wait = Duration::from_secs_f64(1.0 / self.refill_per_sec.max(0.001));
                return Err(wait);
            }
            if self
                .tokens
                .compare_exchange(current, current - 1, Ordering::Release, Ordering::Acquire)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    /// Current token count (after an implicit refill).
    pub fn available(&self) -> u64 {
        self.refill();
        self.tokens.load(Ordering::Acquire)
    }
}

/// Per-worker lifecycle state (spec §4.8 "expose each worker's state").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Busy,
    Stopped,
}

/// Point-in-time snapshot of one worker.
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub id: usize,
    pub state: WorkerState,
    pub current_key: Option<String>,
    pub started_at: Option<Instant>,
}

/// Whether a completed task succeeded, for the completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmOutcomeStatus {
    Success,
    Failed,
}

/// Emitted once per completed [`WarmTask`] (spec §4.8 step 7).
#[derive(Debug, Clone)]
pub struct WarmEvent {
    pub key: String,
    pub status: WarmOutcomeStatus,
    pub duration_ms: u64,
    pub strategy: &'static str,
}

/// Cumulative pool counters (spec §4.8 "Metrics").
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolMetrics {
    pub jobs_total: u64,
    pub success_total: u64,
    pub failure_total: u64,
    pub origin_requests: u64,
    pub cache_writes: u64,
    pub rate_limit_hits: u64,
    pub emergency_stops: u64,
    pub total_duration_ms: u64,
}

#[derive(Default)]
struct Counters {
    jobs_total: AtomicU64,
    success_total: AtomicU64,
    failure_total: AtomicU64,
    origin_requests: AtomicU64,
    cache_writes: AtomicU64,
    rate_limit_hits: AtomicU64,
    emergency_stops: AtomicU64,
    total_duration_ms: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PoolMetrics {
        PoolMetrics {
            jobs_total: self.jobs_total.load(Ordering::Relaxed),
            success_total: self.success_total.load(Ordering::Relaxed),
            failure_total: self.failure_total.load(Ordering::Relaxed),
            origin_requests: self.origin_requests.load(Ordering::Relaxed),
            cache_writes: self.cache_writes.load(Ordering::Relaxed),
            rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
            emergency_stops: self.emergency_stops.load(Ordering::Relaxed),
            total_duration_ms: self.total_duration_ms.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of a dedup-barrier fetch, carried through the
/// [`Coalescer`]'s fixed `Result<V, String>` channel so joiners still see
/// the right typed [`WarmingError`] instead of a collapsed generic one.
#[derive(Clone)]
enum FetchOutcome {
    Value(Option<Bytes>),
    RateLimited(Duration),
    Timeout,
    Fetch(String),
}

/// Bounded-queue, N-worker warming pool: dequeues [`WarmTask`]s, runs the
/// seven-step execution pipeline (spec §4.8), and writes successful
/// fetches back through a [`CacheManager`].
pub struct WarmingPool {
    bucket: Arc<TokenBucket>,
    origin: Arc<dyn OriginFetcher>,
    cache: Arc<CacheManager>,
    config: WarmingConfig,
    emergency_stop: Arc<AtomicBool>,
    coalescer: Arc<Coalescer<String, FetchOutcome>>,
    sender: mpsc::Sender<WarmTask>,
    receiver: Arc<AsyncMutex<mpsc::Receiver<WarmTask>>>,
    workers: Vec<parking_lot::Mutex<WorkerStatus>>,
    metrics: Arc<Counters>,
    events: broadcast::Sender<WarmEvent>,
    cancel: CancellationToken,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl WarmingPool {
    /// Build a pool sized and rate-limited per `config`, fetching from
    /// `origin` and writing successes through `cache`. No worker loops
    /// run until [`Self::start`] is called.
    pub fn new(config: WarmingConfig, origin: Arc<dyn OriginFetcher>, cache: Arc<CacheManager>) -> Arc<Self> {
        let queue_capacity = config.max_batch_size.max(1);
        let (sender, receiver) = mpsc::channel(queue_capacity);
        let (events, _rx) = broadcast::channel(256);
        let workers = (0..config.concurrent_warmers)
            .map(|id| {
                parking_lot::Mutex::new(WorkerStatus {
                    id,
                    state: WorkerState::Stopped,
                    current_key: None,
                    started_at: None,
                })
            })
            .collect();

        Arc::new(Self {
            bucket: Arc::new(TokenBucket::new(config.max_origin_rps, config.max_origin_rps as f64)),
            origin,
            cache,
            config,
            emergency_stop: Arc::new(AtomicBool::new(false)),
            coalescer: Arc::new(Coalescer::new()),
            sender,
            receiver: Arc::new(AsyncMutex::new(receiver)),
            workers,
            metrics: Arc::new(Counters::default()),
            events,
            cancel: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// Is the emergency-stop latch currently set?
    pub fn is_emergency_stopped(&self) -> bool {
        self.emergency_stop.load(Ordering::Acquire)
    }

    /// Admin action: clear the emergency-stop latch so warming resumes.
    /// The latch never clears itself (spec's own recommendation: treat
    /// sustained origin slowness as an operational condition, not one to
    /// guess an auto-recovery timer for).
    pub fn clear_emergency_stop(&self) {
        self.emergency_stop.store(false, Ordering::Release);
    }

    /// Current cumulative metrics.
    pub fn metrics(&self) -> PoolMetrics {
        self.metrics.snapshot()
    }

    /// Snapshot of every worker's current status.
    pub fn worker_statuses(&self) -> Vec<WorkerStatus> {
        self.workers.iter().map(|w| w.lock().clone()).collect()
    }

    /// Subscribe to per-task completion events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<WarmEvent> {
        self.events.subscribe()
    }

    /// Non-blocking enqueue: accepts as many of `tasks` as fit in the
    /// bounded queue and drops the rest, returning how many were
    /// actually accepted (spec §4.8 "QueueTasks ... non-blocking").
    pub fn queue_tasks(&self, tasks: Vec<WarmTask>) -> usize {
        let mut queued = 0;
        for task in tasks {
            if self.sender.try_send(task).is_ok() {
                queued += 1;
            }
        }
        queued
    }

    /// Spawn `ConcurrentWarmers` worker loops. Idempotent calls after the
    /// first just add another round of workers; callers should only call
    /// this once per pool instance.
    pub fn start(self: &Arc<Self>) {
        for id in 0..self.config.concurrent_warmers {
            {
                let mut status = self.workers[id].lock();
                status.state = WorkerState::Idle;
            }
            let pool = self.clone();
            let handle = tokio::spawn(async move { pool.worker_loop(id).await });
            self.tasks.lock().push(handle);
        }
    }

    /// Signal every worker to stop after its current task and wait for
    /// them to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn worker_loop(self: Arc<Self>, id: usize) {
        loop {
            let task = tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.set_worker_state(id, WorkerState::Stopped, None, None);
                    return;
                }
                task = async { self.receiver.lock().await.recv().await } => task,
            };
            match task {
                Some(task) => self.execute(id, task).await,
                None => {
                    self.set_worker_state(id, WorkerState::Stopped, None, None);
                    return;
                }
            }
        }
    }

    async fn execute(&self, worker_id: usize, task: WarmTask) {
        self.metrics.jobs_total.fetch_add(1, Ordering::Relaxed);
        self.set_worker_state(worker_id, WorkerState::Busy, Some(task.key.clone()), Some(Instant::now()));

        let started = Instant::now();
        let result = self.run_pipeline(&task).await;
        let duration = started.elapsed();
        self.metrics.total_duration_ms.fetch_add(duration.as_millis() as u64, Ordering::Relaxed);

        let status = match &result {
            Ok(()) => {
                self.metrics.success_total.fetch_add(1, Ordering::Relaxed);
                WarmOutcomeStatus::Success
            }
            Err(e) => {
                warn!(key = task.key, error = %e, "warm task failed");
                self.metrics.failure_total.fetch_add(1, Ordering::Relaxed);
                WarmOutcomeStatus::Failed
            }
        };
        let _ = self.events.send(WarmEvent {
            key: task.key.clone(),
            status,
            duration_ms: duration.as_millis() as u64,
            strategy: task.strategy_name,
        });

        self.set_worker_state(worker_id, WorkerState::Idle, None, None);
    }

    /// The seven-step `ExecuteWarmTask` pipeline (spec §4.8).
    async fn run_pipeline(&self, task: &WarmTask) -> Result<(), WarmingError> {
        // 1. Fast reject if emergency-stop is set.
        if self.is_emergency_stopped() {
            return Err(WarmingError::EmergencyStopActive);
        }

        // 2. Dedup barrier: join an in-flight fetch for the same key
        // instead of duplicating origin work.
        let origin = self.origin.clone();
        let bucket = self.bucket.clone();
        let config = self.config.clone();
        let metrics = self.metrics.clone();
        let emergency_stop = self.emergency_stop.clone();
        let key = task.key.clone();
        let outcome = self
            .coalescer
            .do_call(key.clone(), move || async move {
                Ok::<FetchOutcome, String>(
                    Self::fetch_with_retry(&origin, &bucket, &config, &metrics, &emergency_stop, &key).await,
                )
            })
            .await;

        let fetch_outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => return Err(WarmingError::Fetch(e)),
        };

        let value = match fetch_outcome {
            FetchOutcome::RateLimited(wait) => return Err(WarmingError::RateLimited(wait)),
            FetchOutcome::Timeout => return Err(WarmingError::Timeout(task.key.clone())),
            FetchOutcome::Fetch(e) => return Err(WarmingError::Fetch(e)),
            FetchOutcome::Value(None) => return Ok(()),
            FetchOutcome::Value(Some(value)) => value,
        };

        // 6. Write to the cache client; this crate's origin contract
        // carries no per-value TTL, so the task's own TTL is always used.
        self.cache
            .set(&task.key, value, Some(task.ttl))
            .await
            .map_err(|e| WarmingError::Fetch(e.to_string()))?;
        self.metrics.cache_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Steps 3-5: acquire a rate-limit token (re-acquired on every retry
    /// attempt), fetch under `OriginTimeout`, retry with exponential
    /// backoff, and trip the emergency-stop latch (failing the task
    /// outright) if a fetch is pathologically slow.
    async fn fetch_with_retry(
        origin: &Arc<dyn OriginFetcher>,
        bucket: &Arc<TokenBucket>,
        config: &WarmingConfig,
        metrics: &Arc<Counters>,
        emergency_stop: &Arc<AtomicBool>,
        key: &str,
    ) -> FetchOutcome {
        let mut attempt = 0;
        loop {
            if let Err(wait) = Self::acquire_token(bucket, config.origin_timeout).await {
                metrics.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
                return FetchOutcome::RateLimited(wait);
            }

            metrics.origin_requests.fetch_add(1, Ordering::Relaxed);
            let started = Instant::now();
            let result = tokio::time::timeout(config.origin_timeout, origin.fetch(key)).await;
            let elapsed = started.elapsed();

            if elapsed >= config.emergency_threshold {
                warn!(key, ?elapsed, "origin fetch exceeded emergency threshold, tripping latch");
                emergency_stop.store(true, Ordering::Release);
                metrics.emergency_stops.fetch_add(1, Ordering::Relaxed);
                return FetchOutcome::Fetch(format!(
                    "fetch for {key} exceeded emergency threshold ({elapsed:?})"
                ));
            }

            match result {
                Ok(Ok(value)) => return FetchOutcome::Value(value),
                Ok(Err(e)) => {
                    attempt += 1;
                    if attempt > config.retry_attempts {
                        return FetchOutcome::Fetch(e.to_string());
                    }
                }
                Err(_) => {
                    attempt += 1;
                    if attempt > config.retry_attempts {
                        return FetchOutcome::Timeout;
                    }
                }
            }

            let backoff = config.backoff_base * 2u32.saturating_pow(attempt - 1);
            tokio::time::sleep(backoff).await;
        }
    }

    /// Poll the token bucket until a token frees up or `timeout` elapses.
    async fn acquire_token(bucket: &Arc<TokenBucket>, timeout: Duration) -> Result<(), Duration> {
        let deadline = Instant::now() + timeout;
        loop {
            match bucket.try_take() {
                Ok(()) => return Ok(()),
                Err(wait) => {
                    if Instant::now() >= deadline {
                        return Err(wait);
                    }
                    tokio::time::sleep(wait.min(Duration::from_millis(20))).await;
                }
            }
        }
    }

    fn set_worker_state(
        &self,
        id: usize,
        state: WorkerState,
        current_key: Option<String>,
        started_at: Option<Instant>,
    ) {
        let mut status = self.workers[id].lock();
        status.state = state;
        status.current_key = current_key;
        status.started_at = started_at;
    }
}
