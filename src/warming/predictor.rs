//! Hot-key predictor (C7)
//!
//! Tracks a per-key access ring and scores future-hot keys from
//! frequency × growth × recency. Grounded on `enterprise::analytics::metrics`'s
//! label-keyed registry shape (a `DashMap` of per-entity state updated on
//! every observation) and on `enterprise::cache::tier::CacheEntry`'s
//! hit-count bookkeeping for what "access" means per key.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Duration;

/// Bound on the per-key ring of recent access timestamps.
const RING_CAPACITY: usize = 100;

/// Per-key access bookkeeping.
#[derive(Debug, Clone)]
struct AccessRecord {
    first_seen: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
    total_accesses: u64,
    recent: VecDeque<DateTime<Utc>>,
}

impl AccessRecord {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            first_seen: now,
            last_accessed: now,
            total_accesses: 0,
            recent: VecDeque::with_capacity(RING_CAPACITY),
        }
    }

    fn record(&mut self, now: DateTime<Utc>) {
        self.last_accessed = now;
        self.total_accesses += 1;
        if self.recent.len() == RING_CAPACITY {
            self.recent.pop_front();
        }
        self.recent.push_back(now);
    }
}

/// A key and its predicted-hotness score, returned by [`HotKeyPredictor::predict_hot_keys`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredKey {
    pub key: String,
    pub score: f64,
}

/// Records key accesses and ranks keys by predicted future hotness.
pub struct HotKeyPredictor {
    records: DashMap<String, AccessRecord>,
}

impl HotKeyPredictor {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Record one access to `key` at `now`.
    pub fn record_access(&self, key: &str, now: DateTime<Utc>) {
        self.records
            .entry(key.to_string())
            .or_insert_with(|| AccessRecord::new(now))
            .record(now);
    }

    /// Rank every tracked key by predicted hotness within `window`,
    /// returning at most `limit` keys with `score > 0`, descending.
    pub fn predict_hot_keys(&self, window: Duration, limit: usize, now: DateTime<Utc>) -> Vec<ScoredKey> {
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());
        let cutoff = now - window;

        let mut scored: Vec<ScoredKey> = self
            .records
            .iter()
            .filter_map(|entry| {
                let record = entry.value();
                let hours_since_first_seen =
                    (now - record.first_seen).num_seconds() as f64 / 3600.0;
                let frequency = record.total_accesses as f64 / hours_since_first_seen.max(1.0);

                let recent_count = record.recent.iter().filter(|t| **t >= cutoff).count() as f64;
                let growth_rate = if frequency > 0.0 {
                    (recent_count - frequency) / frequency
                } else {
                    0.0
                };

                let minutes_since_last = (now - record.last_accessed).num_seconds() as f64 / 60.0;
                let recency_bonus = if minutes_since_last < 5.0 {
                    2.0
                } else if minutes_since_last < 30.0 {
                    1.5
                } else {
                    1.0
                };

                let score = frequency * (1.0 + growth_rate) * recency_bonus;
                if score > 0.0 {
                    Some(ScoredKey {
                        key: entry.key().clone(),
                        score,
                    })
                } else {
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        scored
    }

    /// Drop every key whose last access predates `now - max_age`.
    pub fn cleanup(&self, max_age: Duration, now: DateTime<Utc>) -> usize {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::zero());
        let cutoff = now - max_age;
        let before = self.records.len();
        self.records.retain(|_, record| record.last_accessed >= cutoff);
        before - self.records.len()
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.records.len()
    }
}

impl Default for HotKeyPredictor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn predict_hot_keys_orders_by_frequency() {
        let predictor = HotKeyPredictor::new();
        for _ in 0..100 {
            predictor.record_access("hot:key", at(0));
        }
        for _ in 0..50 {
            predictor.record_access("warm:key", at(0));
        }
        for _ in 0..10 {
            predictor.record_access("cold:key", at(0));
        }

        let ranked = predictor.predict_hot_keys(Duration::from_secs(3600), 2, at(1));
        assert_eq!(
            ranked.iter().map(|s| s.key.as_str()).collect::<Vec<_>>(),
            vec!["hot:key", "warm:key"]
        );
    }

    #[test]
    fn predict_hot_keys_favors_recency() {
        let predictor = HotKeyPredictor::new();
        for _ in 0..50 {
            predictor.record_access("old:key", at(0));
        }
        for _ in 0..30 {
            predictor.record_access("recent:key", at(10_000));
        }

        let ranked = predictor.predict_hot_keys(Duration::from_secs(3600), 2, at(10_001));
        assert_eq!(ranked[0].key, "recent:key");
    }

    #[test]
    fn no_accesses_yields_no_scored_keys() {
        let predictor = HotKeyPredictor::new();
        let ranked = predictor.predict_hot_keys(Duration::from_secs(3600), 10, at(0));
        assert!(ranked.is_empty());
    }

    #[test]
    fn cleanup_drops_stale_records() {
        let predictor = HotKeyPredictor::new();
        predictor.record_access("stale", at(0));
        predictor.record_access("fresh", at(10_000));

        let dropped = predictor.cleanup(Duration::from_secs(5000), at(10_000));
        assert_eq!(dropped, 1);
        assert_eq!(predictor.tracked_keys(), 1);
    }

    #[test]
    fn ring_is_bounded_at_capacity() {
        let predictor = HotKeyPredictor::new();
        for i in 0..(RING_CAPACITY as i64 + 20) {
            predictor.record_access("k", at(i));
        }
        let entry = predictor.records.get("k").unwrap();
        assert_eq!(entry.recent.len(), RING_CAPACITY);
        assert_eq!(entry.total_accesses, RING_CAPACITY as u64 + 20);
    }
}
