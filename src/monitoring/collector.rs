//! Metric collector (C10): lock-light ingestion of cache-plane events.
//!
//! Three structures, grounded on `enterprise::analytics::metrics`'s
//! `Counter`/`Histogram` (generalized from `RwLock<f64>` to raw atomics
//! since these counters are hit on every Get/Set) and on
//! `enterprise::analytics::aggregator::{TimeWindow, DataPoint}` for the
//! time-series bucket shape.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Capacity of the latency ring buffer.
const LATENCY_RING_CAPACITY: usize = 10_000;

/// What kind of event a [`MetricEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricKind {
    Hit,
    Miss,
    Set,
    Delete,
    Eviction,
    Invalidation,
    Warming,
    Error,
    Latency,
}

/// A single observation emitted by the cache manager, invalidation
/// coordinator, or warming engine.
#[derive(Debug, Clone)]
pub struct MetricEvent {
    pub kind: MetricKind,
    /// Magnitude; ignored for pure counter events, latency in
    /// milliseconds for [`MetricKind::Latency`].
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

impl MetricEvent {
    pub fn counter(kind: MetricKind, source: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            kind,
            value: 1.0,
            timestamp: now,
            source: source.into(),
        }
    }

    pub fn latency(ms: f64, source: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            kind: MetricKind::Latency,
            value: ms,
            timestamp: now,
            source: source.into(),
        }
    }
}

/// Lock-free counters for the eight event kinds that are pure counts.
#[derive(Debug, Default)]
pub struct AtomicCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub sets: AtomicU64,
    pub deletes: AtomicU64,
    pub evictions: AtomicU64,
    pub invalidations: AtomicU64,
    pub warmings: AtomicU64,
    pub errors: AtomicU64,
}

impl AtomicCounters {
    fn record(&self, kind: MetricKind) {
        let counter = match kind {
            MetricKind::Hit => &self.hits,
            MetricKind::Miss => &self.misses,
            MetricKind::Set => &self.sets,
            MetricKind::Delete => &self.deletes,
            MetricKind::Eviction => &self.evictions,
            MetricKind::Invalidation => &self.invalidations,
            MetricKind::Warming => &self.warmings,
            MetricKind::Error => &self.errors,
            MetricKind::Latency => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            warmings: self.warmings.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time read of [`AtomicCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub warmings: u64,
    pub errors: u64,
}

impl CounterSnapshot {
    pub fn requests(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.requests();
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn error_rate(&self) -> f64 {
        let total = self.requests();
        if total == 0 {
            0.0
        } else {
            self.errors as f64 / total as f64
        }
    }
}

/// Fixed-capacity ring of recent latency samples. Writers claim a slot
/// with a fetch-add on the head index and write into it under a
/// per-slot lock, so concurrent writers to distinct slots never
/// contend; under heavy contention on the same slot an older sample is
/// silently overwritten, which is acceptable for a monitoring pipeline.
pub struct LatencyRing {
    slots: Vec<RwLock<Option<(f64, DateTime<Utc>)>>>,
    head: AtomicUsize,
}

impl LatencyRing {
    pub fn new() -> Self {
        Self::with_capacity(LATENCY_RING_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity.max(1)).map(|_| RwLock::new(None)).collect(),
            head: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, value: f64, timestamp: DateTime<Utc>) {
        let idx = self.head.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        *self.slots[idx].write() = Some((value, timestamp));
    }

    /// Every currently-populated sample, in no particular order.
    pub fn all(&self) -> Vec<(f64, DateTime<Utc>)> {
        self.slots.iter().filter_map(|slot| *slot.read()).collect()
    }

    /// Samples observed within `window` of `now`.
    pub fn recent(&self, window: Duration, now: DateTime<Utc>) -> Vec<f64> {
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());
        let cutoff = now - window;
        self.all()
            .into_iter()
            .filter(|(_, ts)| *ts >= cutoff)
            .map(|(v, _)| v)
            .collect()
    }
}

impl Default for LatencyRing {
    fn default() -> Self {
        Self::new()
    }
}

/// Exact percentile summary (linear interpolation over a sorted copy).
#[derive(Debug, Clone, Copy, Default)]
pub struct Percentiles {
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl Percentiles {
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        Self {
            p50: interpolate(&sorted, 0.50),
            p90: interpolate(&sorted, 0.90),
            p95: interpolate(&sorted, 0.95),
            p99: interpolate(&sorted, 0.99),
        }
    }
}

fn interpolate(sorted: &[f64], p: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = rank - lower as f64;
        sorted[lower] + (sorted[upper] - sorted[lower]) * frac
    }
}

/// One second of aggregated activity.
#[derive(Debug, Clone, Default)]
pub struct TimeSeriesBucket {
    pub timestamp: i64,
    pub counters: CounterSnapshotDelta,
    pub latencies: Vec<f64>,
}

/// Per-bucket counter deltas (as opposed to [`CounterSnapshot`]'s
/// cumulative totals).
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterSnapshotDelta {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub warmings: u64,
    pub errors: u64,
}

impl CounterSnapshotDelta {
    fn record(&mut self, kind: MetricKind) {
        match kind {
            MetricKind::Hit => self.hits += 1,
            MetricKind::Miss => self.misses += 1,
            MetricKind::Set => self.sets += 1,
            MetricKind::Delete => self.deletes += 1,
            MetricKind::Eviction => self.evictions += 1,
            MetricKind::Invalidation => self.invalidations += 1,
            MetricKind::Warming => self.warmings += 1,
            MetricKind::Error => self.errors += 1,
            MetricKind::Latency => {}
        }
    }
}

/// 1-second resolution time-series, keyed by `floor(timestamp)`.
pub struct TimeSeries {
    buckets: DashMap<i64, TimeSeriesBucket>,
    retention: Duration,
}

impl TimeSeries {
    pub fn new(retention: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            retention,
        }
    }

    pub fn add(&self, event: &MetricEvent) {
        let key = event.timestamp.timestamp();
        let mut bucket = self.buckets.entry(key).or_insert_with(|| TimeSeriesBucket {
            timestamp: key,
            ..Default::default()
        });
        match event.kind {
            MetricKind::Latency => bucket.latencies.push(event.value),
            other => bucket.counters.record(other),
        }
    }

    /// Drop buckets older than `retention` relative to `now`. Intended
    /// to run roughly once a minute.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now.timestamp() - self.retention.as_secs() as i64;
        let before = self.buckets.len();
        self.buckets.retain(|ts, _| *ts >= cutoff);
        before - self.buckets.len()
    }

    /// Buckets with `start <= timestamp <= end`, sorted ascending.
    pub fn get_range(&self, start: i64, end: i64) -> Vec<TimeSeriesBucket> {
        let mut buckets: Vec<TimeSeriesBucket> = self
            .buckets
            .iter()
            .filter(|entry| *entry.key() >= start && *entry.key() <= end)
            .map(|entry| entry.value().clone())
            .collect();
        buckets.sort_by_key(|b| b.timestamp);
        buckets
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Ingests [`MetricEvent`]s into the counters, latency ring, and
/// time-series bucket map in one call.
pub struct MetricCollector {
    pub counters: AtomicCounters,
    pub latencies: LatencyRing,
    pub series: TimeSeries,
}

impl MetricCollector {
    pub fn new(retention: Duration) -> Self {
        Self {
            counters: AtomicCounters::default(),
            latencies: LatencyRing::new(),
            series: TimeSeries::new(retention),
        }
    }

    pub fn record(&self, event: MetricEvent) {
        self.counters.record(event.kind);
        if event.kind == MetricKind::Latency {
            self.latencies.push(event.value, event.timestamp);
        }
        self.series.add(&event);
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
    fn counters_increment_lock_free() {
        let collector = MetricCollector::new(Duration::from_secs(3600));
        collector.record(MetricEvent::counter(MetricKind::Hit, "l1", at(0)));
        collector.record(MetricEvent::counter(MetricKind::Hit, "l1", at(0)));
        collector.record(MetricEvent::counter(MetricKind::Miss, "l1", at(0)));

        let snapshot = collector.counters.snapshot();
        assert_eq!(snapshot.hits, 2);
        assert_eq!(snapshot.misses, 1);
        assert!((snapshot.hit_rate() - (2.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn latency_ring_reports_recent_window() {
        let ring = LatencyRing::with_capacity(16);
        ring.push(10.0, at(0));
        ring.push(20.0, at(100));

        let recent = ring.recent(Duration::from_secs(10), at(100));
        assert_eq!(recent, vec![20.0]);
    }

    #[test]
    fn percentiles_interpolate_exactly() {
        let samples: Vec<f64> = (1..=10).map(|v| v as f64).collect();
        let p = Percentiles::from_samples(&samples);
        assert!((p.p50 - 5.5).abs() < 1e-9);
        assert!((p.p99 - 9.91).abs() < 1e-9);
    }

    #[test]
    fn time_series_buckets_by_second_and_sweeps_stale() {
        let series = TimeSeries::new(Duration::from_secs(60));
        series.add(&MetricEvent::counter(MetricKind::Hit, "l1", at(0)));
        series.add(&MetricEvent::counter(MetricKind::Hit, "l1", at(0)));
        series.add(&MetricEvent::latency(5.0, "l1", at(0)));
        series.add(&MetricEvent::counter(MetricKind::Hit, "l1", at(500)));

        let bucket = series.get_range(1_700_000_000, 1_700_000_000).pop().unwrap();
        assert_eq!(bucket.counters.hits, 2);
        assert_eq!(bucket.latencies, vec![5.0]);

        let dropped = series.sweep(at(500));
        assert_eq!(dropped, 1);
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn latency_ring_overwrites_oldest_slot_at_capacity() {
        let ring = LatencyRing::with_capacity(2);
        ring.push(1.0, at(0));
        ring.push(2.0, at(1));
        ring.push(3.0, at(2));

        let mut all: Vec<f64> = ring.all().into_iter().map(|(v, _)| v).collect();
        all.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(all, vec![2.0, 3.0]);
    }
}
