//! Cache plane service facade
//!
//! Wires the cache manager (C1-C4), invalidation coordinator (C5), warming
//! engine (C6-C9), and monitoring pipeline (C10-C13) into one handle and
//! owns every background task's lifecycle. Grounded on the design notes'
//! "explicit task primitives" rule: every loop is spawned here with a
//! shared [`CancellationToken`] and its [`JoinHandle`] is kept so
//! [`CachePlaneService::shutdown`] can close the signal and join every
//! task rather than relying on process exit (compare
//! `scheduling::worker::Worker::start`/`stop`, which pairs an
//! `AtomicBool` run-flag with a spawned loop — the token-based version
//! here composes more cleanly across several independent loops).

use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CachePlaneConfig;
use crate::invalidation::audit::InvalidationReason;
use crate::invalidation::{InvalidationCoordinator, InvalidationRequest};
use crate::manager::adapters::{AuditSink, OriginFetcher, RemoteCache};
use crate::manager::CacheManager;
use crate::monitoring::collector::{MetricEvent, MetricKind};
use crate::monitoring::{AlertManager, AlertTransition, Aggregator, AnomalyDetector, MetricCollector};
use crate::pubsub::Topic;
use crate::warming::{
    plan, HotKeyPredictor, PlanOptions, StrategyKind, WarmOutcomeStatus, WarmingPool, WarmingScheduler,
};

/// How far back the predictor's access ring is swept on each cleanup
/// tick. Not exposed in [`CachePlaneConfig`] since it's a housekeeping
/// constant, not a tunable behavior.
const PREDICTOR_MAX_AGE: std::time::Duration = std::time::Duration::from_secs(24 * 3600);

/// Owns every cache-plane engine and the background tasks that drive
/// them: TTL sweep, aggregation tick, alert evaluation, predictor
/// cleanup, and scheduled warming.
pub struct CachePlaneService {
    pub manager: Arc<CacheManager>,
    pub invalidation: Arc<InvalidationCoordinator<Bytes>>,
    pub warming_pool: Arc<WarmingPool>,
    pub predictor: Arc<HotKeyPredictor>,
    pub scheduler: Arc<Mutex<WarmingScheduler>>,
    pub collector: Arc<MetricCollector>,
    pub aggregator: Arc<Mutex<Aggregator>>,
    pub anomaly: Arc<Mutex<AnomalyDetector>>,
    pub alerts: Arc<Mutex<AlertManager>>,
    config: CachePlaneConfig,
    cancel: CancellationToken,
    tasks: SyncMutex<Vec<JoinHandle<()>>>,
}

impl CachePlaneService {
    /// Build every engine from `config`, wired to the given origin,
    /// optional L2 tier, and audit sink. No background tasks run until
    /// [`CachePlaneService::start`] is called.
    pub fn new(
        config: CachePlaneConfig,
        origin: Arc<dyn OriginFetcher>,
        remote: Option<Arc<dyn RemoteCache>>,
        audit: Arc<dyn AuditSink>,
    ) -> Arc<Self> {
        let manager = Arc::new(CacheManager::new(config.l1.clone(), origin.clone(), remote.clone(), audit.clone()));
        let topic = Arc::new(Topic::new());
        let invalidation = Arc::new(InvalidationCoordinator::new(
            manager.l1_store(),
            manager.pattern_matcher(),
            remote,
            topic,
            audit,
        ));
        let warming_pool = WarmingPool::new(config.warming.clone(), origin, manager.clone());
        let predictor = Arc::new(HotKeyPredictor::new());
        let scheduler = Arc::new(Mutex::new(WarmingScheduler::with_builtin_jobs(Utc::now())));
        let collector = Arc::new(MetricCollector::new(config.monitoring.metrics_retention));
        let aggregator = Arc::new(Mutex::new(Aggregator::new(collector.clone(), config.monitoring.aggregation_window)));
        let anomaly = Arc::new(Mutex::new(AnomalyDetector::new()));
        let alerts = Arc::new(Mutex::new(AlertManager::with_builtin_rules()));

        Arc::new(Self {
            manager,
            invalidation,
            warming_pool,
            predictor,
            scheduler,
            collector,
            aggregator,
            anomaly,
            alerts,
            config,
            cancel: CancellationToken::new(),
            tasks: SyncMutex::new(Vec::new()),
        })
    }

    /// Read-through get, recording a hit/miss metric event.
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>, crate::error::CachePlaneError> {
        let outcome = self.manager.get(key).await?;
        let kind = if outcome.is_some() { MetricKind::Hit } else { MetricKind::Miss };
        self.collector.record(MetricEvent::counter(kind, "cache_manager", Utc::now()));
        self.predictor.record_access(key, Utc::now());
        Ok(outcome.map(|o| o.value))
    }

    /// Write-through set, recording a set metric event.
    pub async fn set(&self, key: &str, value: Bytes, ttl: Option<std::time::Duration>) -> Result<(), crate::error::CachePlaneError> {
        self.manager.set(key, value, ttl).await?;
        self.collector.record(MetricEvent::counter(MetricKind::Set, "cache_manager", Utc::now()));
        Ok(())
    }

    /// Process an invalidation request, recording an invalidation metric
    /// event.
    pub async fn invalidate(
        &self,
        request: InvalidationRequest,
        reason: InvalidationReason,
        source: Option<String>,
    ) -> Result<usize, crate::error::CachePlaneError> {
        let removed = self.invalidation.invalidate(request, reason, source).await?;
        self.collector.record(MetricEvent::counter(MetricKind::Invalidation, "invalidation_coordinator", Utc::now()));
        Ok(removed)
    }

    /// Plan `options` per `strategy`, using the predictor's current
    /// scores, queue every resulting task onto the warming pool, and wait
    /// for all of them to complete. Returns the number of keys warmed
    /// successfully.
    #[tracing::instrument(skip(self, options))]
    pub async fn warm(&self, strategy: StrategyKind, options: PlanOptions) -> usize {
        let scores = self.predictor.predict_hot_keys(std::time::Duration::from_secs(3600), usize::MAX, Utc::now());
        let tasks = plan(strategy, options, &scores);
        let expected = tasks.len();
        if expected == 0 {
            return 0;
        }

        let mut events = self.warming_pool.subscribe_events();
        let queued = self.warming_pool.queue_tasks(tasks);
        if queued < expected {
            warn!(queued, expected, "warming queue dropped overflow tasks");
        }

        let mut warmed = 0;
        for _ in 0..queued {
            let Ok(event) = events.recv().await else { break };
            match event.status {
                WarmOutcomeStatus::Success => {
                    self.collector.record(MetricEvent::counter(MetricKind::Warming, "warming_pool", Utc::now()));
                    warmed += 1;
                }
                WarmOutcomeStatus::Failed => {
                    debug!(key = event.key, "warm task did not complete successfully");
                    self.collector.record(MetricEvent::counter(MetricKind::Error, "warming_pool", Utc::now()));
                }
            }
        }
        warmed
    }

    /// Run predictor-driven warming: rank currently-tracked keys and
    /// warm the top `limit` with `strategy`.
    pub async fn trigger_predictive_warm(&self, strategy: StrategyKind, limit: usize) -> usize {
        let scores = self.predictor.predict_hot_keys(std::time::Duration::from_secs(3600), limit, Utc::now());
        let options = PlanOptions {
            keys: scores.iter().map(|s| s.key.clone()).collect(),
            limit: Some(limit),
            ..Default::default()
        };
        self.warm(strategy, options).await
    }

    /// Spawn every background loop. Idempotent calls after the first are
    /// a no-op aside from re-registering (callers should only call this
    /// once per service instance).
    pub fn start(self: &Arc<Self>) {
        self.warming_pool.start();
        self.spawn(Self::ttl_sweep_loop);
        self.spawn(Self::aggregation_loop);
        self.spawn(Self::alert_loop);
        self.spawn(Self::predictor_cleanup_loop);
        self.spawn(Self::scheduler_loop);
    }

    fn spawn<F, Fut>(self: &Arc<Self>, f: F)
    where
        F: FnOnce(Arc<Self>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(f(self.clone()));
        self.tasks.lock().push(handle);
    }

    async fn ttl_sweep_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.l1.cleanup_interval);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let swept = self.manager.cleanup_expired();
                    if swept > 0 {
                        debug!(swept, "ttl sweep removed expired entries");
                    }
                }
            }
        }
    }

    async fn aggregation_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.monitoring.aggregation_window);
        let mut last_sweep = Utc::now();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let now = Utc::now();
                    let snapshot = self.aggregator.lock().await.tick(now);
                    let anomalies = self.anomaly.lock().await.observe(&snapshot);
                    for anomaly in anomalies {
                        warn!(kind = ?anomaly.kind, z = anomaly.z_score, severity = ?anomaly.severity, "anomaly detected");
                    }
                    if (now - last_sweep).num_seconds() >= 60 {
                        let dropped = self.collector.series.sweep(now);
                        if dropped > 0 {
                            debug!(dropped, "time-series sweep dropped stale buckets");
                        }
                        last_sweep = now;
                    }
                }
            }
        }
    }

    async fn alert_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.monitoring.alert_eval_interval);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let now = Utc::now();
                    let window = self
                        .aggregator
                        .lock()
                        .await
                        .get_stats(now - chrono::Duration::seconds(60), now);
                    if window.is_empty() {
                        continue;
                    }
                    let detector = self.anomaly.lock().await;
                    let transitions = self.alerts.lock().await.evaluate(&window, &detector);
                    drop(detector);
                    for transition in transitions {
                        match transition {
                            AlertTransition::Triggered(a) => warn!(rule = a.rule_id, severity = ?a.severity, "alert triggered"),
                            AlertTransition::Updated(a) => debug!(rule = a.rule_id, value = a.current_value, "alert updated"),
                            AlertTransition::Resolved(a) => info!(rule = a.rule_id, duration = ?a.duration(), "alert resolved"),
                        }
                    }
                }
            }
        }
    }

    async fn predictor_cleanup_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(3600));
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let dropped = self.predictor.cleanup(PREDICTOR_MAX_AGE, Utc::now());
                    if dropped > 0 {
                        debug!(dropped, "predictor cleanup dropped stale access records");
                    }
                }
            }
        }
    }

    async fn scheduler_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(30));
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let now = Utc::now();
                    let due: Vec<(String, StrategyKind, usize, u32)> = {
                        let scheduler = self.scheduler.lock().await;
                        scheduler
                            .due_jobs(now)
                            .into_iter()
                            .map(|j| (j.id.clone(), j.strategy, j.limit, j.priority))
                            .collect()
                    };
                    for (id, strategy, limit, _priority) in due {
                        let warmed = self.trigger_predictive_warm(strategy, limit).await;
                        info!(job = id, warmed, "scheduled warm job fired");
                        self.scheduler.lock().await.mark_fired(&id, now);
                    }
                }
            }
        }
    }

    /// Signal every background loop to stop and wait for them to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            let _ = handle.await;
        }
        self.warming_pool.shutdown().await;
    }
}
