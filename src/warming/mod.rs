//! Warming engine (C6-C9): strategies, hot-key prediction, the rate- and
//! concurrency-bounded worker pool, and the cron-triggered scheduler.

pub mod pool;
pub mod predictor;
pub mod scheduler;
pub mod strategy;

pub use pool::{PoolMetrics, WarmEvent, WarmOutcomeStatus, WarmingPool, WorkerState, WorkerStatus};
pub use predictor::{HotKeyPredictor, ScoredKey};
pub use scheduler::WarmingScheduler;
pub use strategy::{plan, PlanOptions, StrategyKind, WarmTask, MAX_PLAN_LIMIT};
