//! Anomaly detector (C12): Welford running mean/variance over a ring,
//! z-score thresholding against four tracked metrics.
//!
//! Net new to this engine — the teacher's `enterprise::analytics`
//! package has a simple `detect_anomalies` over a full rebuilt
//! `Vec<f64>` (`enterprise::analytics::aggregator::Aggregator::detect_anomalies`),
//! but nothing maintains a fixed-capacity ring with online
//! add-and-subtract updates. The ring/subtract-then-add shape below is
//! built directly from Welford's algorithm rather than adapted from an
//! existing module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::monitoring::aggregator::AggregateSnapshot;

/// Ring capacity for each tracked metric's historical stats.
const RING_CAPACITY: usize = 100;
/// Minimum samples before z-scores are trusted.
const MIN_SAMPLES: usize = 10;
/// Cap on retained anomaly history.
const MAX_ANOMALY_HISTORY: usize = 100;

/// Fixed-capacity ring maintaining an online mean/variance via
/// Welford's algorithm. When the ring is full, the value about to be
/// overwritten is first subtracted from `(mean, m2)` before the new
/// value is added, so stale samples never bias a "live" window.
struct WelfordRing {
    buffer: Vec<f64>,
    head: usize,
    filled: usize,
    count: usize,
    mean: f64,
    m2: f64,
}

impl WelfordRing {
    fn new() -> Self {
        Self {
            buffer: vec![0.0; RING_CAPACITY],
            head: 0,
            filled: 0,
            count: 0,
            mean: 0.0,
            m2: 0.0,
        }
    }

    fn add(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;
    }

    fn remove(&mut self, x: f64) {
        let new_count = self.count - 1;
        if new_count == 0 {
            self.mean = 0.0;
            self.m2 = 0.0;
        } else {
            let new_mean = (self.mean * self.count as f64 - x) / new_count as f64;
            self.m2 -= (x - self.mean) * (x - new_mean);
            self.mean = new_mean;
        }
        self.count = new_count;
    }

    fn push(&mut self, x: f64) {
        if self.filled < RING_CAPACITY {
            self.buffer[self.filled] = x;
            self.filled += 1;
            self.add(x);
        } else {
            let old = self.buffer[self.head];
            self.buffer[self.head] = x;
            self.head = (self.head + 1) % RING_CAPACITY;
            self.remove(old);
            self.add(x);
        }
    }

    fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    /// `(x - mean) / std_dev` against the ring's current stats, or
    /// `None` if fewer than [`MIN_SAMPLES`] samples have been recorded
    /// or the variance is degenerate.
    fn z_score(&self, x: f64) -> Option<f64> {
        if self.count < MIN_SAMPLES {
            return None;
        }
        let std_dev = self.variance().sqrt();
        if std_dev <= f64::EPSILON {
            return None;
        }
        Some((x - self.mean) / std_dev)
    }
}

/// Which metric tripped the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnomalyKind {
    HitRateDrop,
    LatencySpike,
    ErrorRateSpike,
    QpsAnomaly,
}

/// How far from the historical mean the triggering value was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

fn severity_for(abs_z: f64) -> Severity {
    if abs_z < 3.5 {
        Severity::Low
    } else if abs_z < 4.0 {
        Severity::Medium
    } else if abs_z < 5.0 {
        Severity::High
    } else {
        Severity::Critical
    }
}

/// A single detected anomaly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub z_score: f64,
    pub severity: Severity,
    pub value: f64,
    pub detected_at: DateTime<Utc>,
}

/// Tracks historical stats for hit rate, p95 latency, error rate, and
/// QPS, and flags values that deviate sharply from each metric's
/// history.
pub struct AnomalyDetector {
    hit_rate: WelfordRing,
    p95_latency: WelfordRing,
    error_rate: WelfordRing,
    qps: WelfordRing,
    history: VecDeque<Anomaly>,
}

impl AnomalyDetector {
    pub fn new() -> Self {
        Self {
            hit_rate: WelfordRing::new(),
            p95_latency: WelfordRing::new(),
            error_rate: WelfordRing::new(),
            qps: WelfordRing::new(),
            history: VecDeque::new(),
        }
    }

    /// Evaluate `snapshot` against each metric's history, then feed the
    /// snapshot's values into the rings for future comparisons.
    pub fn observe(&mut self, snapshot: &AggregateSnapshot) -> Vec<Anomaly> {
        let mut detected = Vec::new();

        if let Some(z) = self.hit_rate.z_score(snapshot.hit_rate) {
            if z < -3.0 {
                detected.push(self.record(AnomalyKind::HitRateDrop, z, snapshot.hit_rate, snapshot.timestamp));
            }
        }
        if let Some(z) = self.p95_latency.z_score(snapshot.latency.p95) {
            if z > 3.0 {
                detected.push(self.record(AnomalyKind::LatencySpike, z, snapshot.latency.p95, snapshot.timestamp));
            }
        }
        if let Some(z) = self.error_rate.z_score(snapshot.error_rate) {
            if z > 3.0 {
                detected.push(self.record(AnomalyKind::ErrorRateSpike, z, snapshot.error_rate, snapshot.timestamp));
            }
        }
        if let Some(z) = self.qps.z_score(snapshot.qps) {
            if z.abs() > 4.0 {
                detected.push(self.record(AnomalyKind::QpsAnomaly, z, snapshot.qps, snapshot.timestamp));
            }
        }

        self.hit_rate.push(snapshot.hit_rate);
        self.p95_latency.push(snapshot.latency.p95);
        self.error_rate.push(snapshot.error_rate);
        self.qps.push(snapshot.qps);

        detected
    }

    fn record(&mut self, kind: AnomalyKind, z: f64, value: f64, now: DateTime<Utc>) -> Anomaly {
        let anomaly = Anomaly {
            kind,
            z_score: z,
            severity: severity_for(z.abs()),
            value,
            detected_at: now,
        };
        if self.history.len() == MAX_ANOMALY_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(anomaly);
        anomaly
    }

    pub fn history(&self) -> Vec<Anomaly> {
        self.history.iter().copied().collect()
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Which of the detector's four rings a [`RuleKind::DynamicThreshold`]
/// alert rule should compare against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedMetric {
    HitRate,
    P95Latency,
    ErrorRate,
    Qps,
}

impl AnomalyDetector {
    /// Z-score of `value` against one of the four tracked rings,
    /// exposed so the alert manager's dynamic-threshold rule can reuse
    /// the same historical stats instead of keeping a second copy.
    pub fn z_score(&self, metric: TrackedMetric, value: f64) -> Option<f64> {
        match metric {
            TrackedMetric::HitRate => self.hit_rate.z_score(value),
            TrackedMetric::P95Latency => self.p95_latency.z_score(value),
            TrackedMetric::ErrorRate => self.error_rate.z_score(value),
            TrackedMetric::Qps => self.qps.z_score(value),
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    /// Naive mean/variance over the values a [`WelfordRing`] would
    /// currently hold, computed directly from a `Vec` for comparison.
    fn naive_mean_variance(values: &[f64]) -> (f64, f64) {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        (mean, variance)
    }

    proptest! {
        /// The ring's online mean/variance tracks a direct recomputation
        /// over the same sliding window to within floating-point
        /// tolerance, even after the ring has wrapped and started
        /// subtracting old values back out.
        #[test]
        fn ring_matches_naive_recomputation_after_wraparound(
            values in prop::collection::vec(-1000.0f64..1000.0, RING_CAPACITY..(RING_CAPACITY * 3)),
        ) {
            let mut ring = WelfordRing::new();
            for &x in &values {
                ring.push(x);
            }
            let window = &values[values.len() - RING_CAPACITY..];
            let (naive_mean, naive_var) = naive_mean_variance(window);

            prop_assert!((ring.mean - naive_mean).abs() < 1e-6 * naive_mean.abs().max(1.0));
            prop_assert!((ring.variance() - naive_var).abs() < 1e-6 * naive_var.abs().max(1.0));
        }
    }
}
