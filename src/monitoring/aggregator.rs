//! Aggregator (C11): periodic 1 Hz snapshots into sliding windows.
//!
//! Grounded on `enterprise::analytics::aggregator::Aggregator`'s
//! `VecDeque`-backed rolling window and percentile/mean/std-dev helpers,
//! narrowed to the three fixed windows (1s/10s/60s) this engine needs
//! instead of an arbitrary `TimeWindow` enum.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::monitoring::collector::{CounterSnapshot, MetricCollector, Percentiles};

/// One second's worth of aggregated state, appended to every window on
/// each tick.
#[derive(Debug, Clone, Copy)]
pub struct AggregateSnapshot {
    pub timestamp: DateTime<Utc>,
    pub counters: CounterSnapshot,
    pub hit_rate: f64,
    pub error_rate: f64,
    /// Requests observed since the previous tick, divided by the tick
    /// interval.
    pub qps: f64,
    pub latency: Percentiles,
}

struct SlidingWindow {
    capacity: usize,
    samples: VecDeque<AggregateSnapshot>,
}

impl SlidingWindow {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    fn push(&mut self, snapshot: AggregateSnapshot) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(snapshot);
    }

    fn span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match (self.samples.front(), self.samples.back()) {
            (Some(first), Some(last)) => Some((first.timestamp, last.timestamp)),
            _ => None,
        }
    }

    fn covers(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        match self.span() {
            Some((first, _)) => first <= start && end >= start,
            None => false,
        }
    }

    fn in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<AggregateSnapshot> {
        self.samples
            .iter()
            .filter(|s| s.timestamp >= start && s.timestamp <= end)
            .copied()
            .collect()
    }
}

/// Periodic aggregation worker state: one tick computes a snapshot from
/// the collector's current counters + recent latency samples and
/// appends it to all three sliding windows.
pub struct Aggregator {
    collector: Arc<MetricCollector>,
    window_1s: SlidingWindow,
    window_10s: SlidingWindow,
    window_60s: SlidingWindow,
    tick_interval: Duration,
    last_counters: Option<CounterSnapshot>,
}

impl Aggregator {
    pub fn new(collector: Arc<MetricCollector>, tick_interval: Duration) -> Self {
        Self {
            collector,
            window_1s: SlidingWindow::new(1),
            window_10s: SlidingWindow::new(10),
            window_60s: SlidingWindow::new(60),
            tick_interval,
            last_counters: None,
        }
    }

    /// Compute and record one snapshot. Intended to run once per
    /// `tick_interval` on a background task.
    pub fn tick(&mut self, now: DateTime<Utc>) -> AggregateSnapshot {
        let counters = self.collector.counters.snapshot();
        let delta_requests = match self.last_counters {
            Some(prev) => counters.requests().saturating_sub(prev.requests()),
            None => 0,
        };
        self.last_counters = Some(counters);

        let qps = delta_requests as f64 / self.tick_interval.as_secs_f64().max(f64::EPSILON);
        let recent_latencies = self.collector.latencies.recent(self.tick_interval, now);

        let snapshot = AggregateSnapshot {
            timestamp: now,
            counters,
            hit_rate: counters.hit_rate(),
            error_rate: counters.error_rate(),
            qps,
            latency: Percentiles::from_samples(&recent_latencies),
        };

        self.window_1s.push(snapshot);
        self.window_10s.push(snapshot);
        self.window_60s.push(snapshot);
        snapshot
    }

    /// The most recent snapshot, if at least one tick has run.
    pub fn latest(&self) -> Option<AggregateSnapshot> {
        self.window_1s.samples.back().copied()
    }

    /// Snapshots between `start` and `end`. Picks the smallest sliding
    /// window that covers the range; if none do, falls back to
    /// rebuilding snapshots from the raw time-series (spec §4.11 "scan
    /// the raw time-series for longer ranges").
    pub fn get_stats(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<AggregateSnapshot> {
        for window in [&self.window_1s, &self.window_10s, &self.window_60s] {
            if window.covers(start, end) {
                return window.in_range(start, end);
            }
        }
        self.rebuild_from_series(start, end)
    }

    fn rebuild_from_series(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<AggregateSnapshot> {
        let buckets = self.collector.series.get_range(start.timestamp(), end.timestamp());
        let mut all_latencies = Vec::new();
        let mut totals = CounterSnapshot::default();
        for bucket in &buckets {
            totals.hits += bucket.counters.hits;
            totals.misses += bucket.counters.misses;
            totals.sets += bucket.counters.sets;
            totals.deletes += bucket.counters.deletes;
            totals.evictions += bucket.counters.evictions;
            totals.invalidations += bucket.counters.invalidations;
            totals.warmings += bucket.counters.warmings;
            totals.errors += bucket.counters.errors;
            all_latencies.extend(bucket.latencies.iter().copied());
        }
        if buckets.is_empty() {
            return Vec::new();
        }
        let span_secs = (end - start).num_seconds().max(1) as f64;
        vec![AggregateSnapshot {
            timestamp: end,
            counters: totals,
            hit_rate: totals.hit_rate(),
            error_rate: totals.error_rate(),
            qps: totals.requests() as f64 / span_secs,
            latency: Percentiles::from_samples(&all_latencies),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::collector::{MetricEvent, MetricKind};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn tick_computes_qps_from_delta_requests() {
        let collector = Arc::new(MetricCollector::new(Duration::from_secs(3600)));
        let mut aggregator = Aggregator::new(collector.clone(), Duration::from_secs(1));

        aggregator.tick(at(0));
        for _ in 0..5 {
            collector.record(MetricEvent::counter(MetricKind::Hit, "l1", at(1)));
        }
        let snapshot = aggregator.tick(at(1));
        assert_eq!(snapshot.qps, 5.0);
    }

    #[test]
    fn get_stats_uses_1s_window_for_single_tick_range() {
        let collector = Arc::new(MetricCollector::new(Duration::from_secs(3600)));
        let mut aggregator = Aggregator::new(collector, Duration::from_secs(1));
        aggregator.tick(at(0));
        aggregator.tick(at(1));

        let stats = aggregator.get_stats(at(1), at(1));
        assert_eq!(stats.len(), 1);
    }

    #[test]
    fn get_stats_falls_back_to_series_beyond_window_coverage() {
        let collector = Arc::new(MetricCollector::new(Duration::from_secs(7200)));
        collector.record(MetricEvent::counter(MetricKind::Hit, "l1", at(0)));
        collector.record(MetricEvent::counter(MetricKind::Hit, "l1", at(5000)));
        let aggregator = Aggregator::new(collector, Duration::from_secs(1));

        let stats = aggregator.get_stats(at(0), at(5000));
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].counters.hits, 2);
    }
}
