//! Warming strategies (C6)
//!
//! Turns a caller's [`PlanOptions`] into an ordered `Vec<WarmTask>`, ready
//! for [`super::pool::WarmingPool::queue_tasks`]. Grounded on
//! `enterprise::cache::strategy::RefreshAheadCache`'s proactive-refresh
//! intent, generalized into three selectable planning algorithms per
//! spec §4.6.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::warming::predictor::ScoredKey;

/// Which planning algorithm a warm request should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    /// Assumes `keys` is pre-ordered by hotness; emits the first `limit`.
    SelectiveHot,
    /// Orders by ascending colon-depth, so parents warm before children.
    BreadthFirst,
    /// Orders by a cost-normalized importance/hotness score.
    PriorityBased,
}

impl StrategyKind {
    /// Parse a strategy name as configured in [`crate::config::WarmingConfig::default_strategy`].
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "selective_hot" => Some(Self::SelectiveHot),
            "breadth_first" => Some(Self::BreadthFirst),
            "priority" => Some(Self::PriorityBased),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::SelectiveHot => "selective_hot",
            Self::BreadthFirst => "breadth_first",
            Self::PriorityBased => "priority",
        }
    }
}

/// A caller's plan request: the candidate keys plus optional overrides.
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Candidate keys. Strategy-specific ordering assumptions apply (see
    /// each strategy's doc comment).
    pub keys: Vec<String>,
    /// Caller-supplied priority per key, keyed by the key itself.
    /// Strategies fall back to their own formula for any key absent
    /// here.
    pub priority: Option<HashMap<String, u32>>,
    /// Maximum tasks to emit. Clamped to [`MAX_PLAN_LIMIT`].
    pub limit: Option<usize>,
    /// Opaque per-plan metadata, carried onto every emitted task.
    pub metadata: Option<HashMap<String, String>>,
}

/// Ceiling on `PlanOptions::limit` (spec §4.6 "clamped to a sane
/// ceiling").
pub const MAX_PLAN_LIMIT: usize = 1000;

/// Default TTL assigned to a planned task absent any other signal.
const DEFAULT_TASK_TTL: Duration = Duration::from_secs(3600);

/// A single key queued for warming, fully specified for the worker pool.
#[derive(Debug, Clone)]
pub struct WarmTask {
    pub key: String,
    /// 0-100; higher warms first within the pool's queue.
    pub priority: u32,
    /// Heuristic estimate of how expensive fetching this key will be.
    pub estimated_cost_ms: u64,
    pub ttl: Duration,
    pub strategy_name: &'static str,
    pub metadata: HashMap<String, String>,
}

/// Number of `:`-delimited segments before the last, e.g. `user:1:profile`
/// has depth 2.
fn colon_depth(key: &str) -> usize {
    key.matches(':').count()
}

/// Heuristic fetch-cost estimate (spec §4.6 "a heuristic based on key
/// length, colon-depth, and content markers"): a flat cost per byte, a
/// per-segment penalty for nesting, and a fixed surcharge for keys that
/// look like aggregate/report data, which tend to be the slow ones in
/// practice.
fn estimated_cost_ms(key: &str) -> u64 {
    const PER_BYTE: u64 = 2;
    const PER_SEGMENT: u64 = 15;
    const BASE: u64 = 10;
    const MARKER_SURCHARGE: u64 = 200;

    let mut cost = BASE + key.len() as u64 * PER_BYTE + colon_depth(key) as u64 * PER_SEGMENT;
    let lowered = key.to_ascii_lowercase();
    if lowered.contains("report") || lowered.contains("analytics") {
        cost += MARKER_SURCHARGE;
    }
    cost
}

fn score_of(scores: &[ScoredKey], key: &str) -> f64 {
    scores
        .iter()
        .find(|s| s.key == key)
        .map(|s| s.score)
        .unwrap_or(0.0)
}

/// Turn `options` into an ordered, bounded set of [`WarmTask`]s per
/// `strategy`, consulting `scores` (from
/// [`crate::warming::predictor::HotKeyPredictor`]) where the strategy
/// calls for it.
pub fn plan(strategy: StrategyKind, options: PlanOptions, scores: &[ScoredKey]) -> Vec<WarmTask> {
    let limit = options.limit.unwrap_or(MAX_PLAN_LIMIT).min(MAX_PLAN_LIMIT);
    let metadata = options.metadata.clone().unwrap_or_default();
    let overrides = options.priority.clone().unwrap_or_default();

    let build = |key: String, priority: u32| -> WarmTask {
        let estimated_cost_ms = estimated_cost_ms(&key);
        WarmTask {
            priority,
            estimated_cost_ms,
            ttl: DEFAULT_TASK_TTL,
            strategy_name: strategy.name(),
            metadata: metadata.clone(),
            key,
        }
    };

    match strategy {
        StrategyKind::SelectiveHot => {
            let cut = options.keys.len().min(limit);
            let n = cut.max(1);
            options
                .keys
                .into_iter()
                .take(cut)
                .enumerate()
                .map(|(i, key)| {
                    let priority = overrides.get(&key).copied().unwrap_or_else(|| {
                        let linear = 100 - (i * 100 / n).min(100);
                        linear as u32
                    });
                    build(key, priority)
                })
                .collect()
        }
        StrategyKind::BreadthFirst => {
            let mut keyed: Vec<(usize, String)> = options
                .keys
                .into_iter()
                .map(|k| (colon_depth(&k), k))
                .collect();
            keyed.sort_by(|(da, ka), (db, kb)| da.cmp(db).then_with(|| ka.cmp(kb)));
            keyed
                .into_iter()
                .take(limit)
                .map(|(depth, key)| {
                    let priority = overrides
                        .get(&key)
                        .copied()
                        .unwrap_or_else(|| (100i64 - 10 * depth as i64).max(0) as u32);
                    build(key, priority)
                })
                .collect()
        }
        StrategyKind::PriorityBased => {
            let n = options.keys.len();
            let top_decile_cutoff = (n as f64 * 0.1).ceil() as usize;
            let mut scored: Vec<(f64, usize, String)> = options
                .keys
                .into_iter()
                .enumerate()
                .map(|(i, key)| {
                    let importance = (n - i) as f64 / n.max(1) as f64;
                    let hotness = if i < top_decile_cutoff { 2.0 } else { 1.0 };
                    let cost = estimated_cost_ms(&key).max(1) as f64;
                    let score = importance * hotness * 100.0 / cost;
                    (score, i, key)
                })
                .collect();
            scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
            scored
                .into_iter()
                .take(limit)
                .map(|(score, i, key)| {
                    let priority = overrides.get(&key).copied().unwrap_or_else(|| {
                        let boosted = score * (1.0 + score_of(scores, &key));
                        boosted.round().clamp(0.0, 100.0) as u32
                    });
                    let _ = i;
                    build(key, priority)
                })
                .collect()
        }
    }
}
