//! Alert manager (C13): rule evaluation and active/resolved alert
//! lifecycle.
//!
//! Grounded on `enterprise::analytics::alerting::{AlertRule, Alert,
//! AlertManager}` for the rule/active-alert/history shape, narrowed
//! from the teacher's free-form `AlertCondition` tree (evaluated
//! against an arbitrary `MetricRegistry`) to the fixed set of
//! cache-plane rules this engine evaluates against an
//! [`AggregateSnapshot`] window.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};

use crate::monitoring::aggregator::AggregateSnapshot;
use crate::monitoring::anomaly::{AnomalyDetector, TrackedMetric};

/// Cap on the resolved-alert history.
const MAX_RESOLVED_HISTORY: usize = 100;

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// What a rule checks.
#[derive(Debug, Clone)]
pub enum RuleKind {
    /// Error rate above `threshold` is always critical.
    HighErrorRate { threshold: f64 },
    /// Hit rate below `warning` is a warning; below `critical` escalates.
    /// Only evaluated once at least `min_requests` have been observed.
    LowHitRate { warning: f64, critical: f64, min_requests: u64 },
    /// p95 latency (ms) above `warning_ms`/`critical_ms`.
    LatencySpike { warning_ms: f64, critical_ms: f64 },
    /// Evictions per second over the evaluation window above `warning_per_sec`.
    HighEvictionRate { warning_per_sec: f64 },
    /// Z-score of `metric` beyond `z_limit` in either direction, reusing
    /// the anomaly detector's historical stats.
    DynamicThreshold { metric: TrackedMetric, z_limit: f64 },
}

/// A registered alert rule.
#[derive(Debug, Clone)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub kind: RuleKind,
    pub enabled: bool,
}

impl AlertRule {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: RuleKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            enabled: true,
        }
    }
}

/// Result of evaluating one rule against the current window: the
/// severity and triggering value, or `None` if the condition isn't met.
struct Trigger {
    severity: AlertSeverity,
    value: f64,
    message: String,
}

fn evaluate_rule(rule: &AlertRule, window: &[AggregateSnapshot], detector: &AnomalyDetector) -> Option<Trigger> {
    let latest = window.last()?;
    match &rule.kind {
        RuleKind::HighErrorRate { threshold } => {
            (latest.error_rate > *threshold).then(|| Trigger {
                severity: AlertSeverity::Critical,
                value: latest.error_rate,
                message: format!("error rate {:.2}% above {:.2}%", latest.error_rate * 100.0, threshold * 100.0),
            })
        }
        RuleKind::LowHitRate { warning, critical, min_requests } => {
            if latest.counters.requests() <= *min_requests {
                return None;
            }
            if latest.hit_rate < *critical {
                Some(Trigger {
                    severity: AlertSeverity::Critical,
                    value: latest.hit_rate,
                    message: format!("hit rate {:.2}% below critical {:.2}%", latest.hit_rate * 100.0, critical * 100.0),
                })
            } else if latest.hit_rate < *warning {
                Some(Trigger {
                    severity: AlertSeverity::Warning,
                    value: latest.hit_rate,
                    message: format!("hit rate {:.2}% below warning {:.2}%", latest.hit_rate * 100.0, warning * 100.0),
                })
            } else {
                None
            }
        }
        RuleKind::LatencySpike { warning_ms, critical_ms } => {
            let p95 = latest.latency.p95;
            if p95 > *critical_ms {
                Some(Trigger {
                    severity: AlertSeverity::Critical,
                    value: p95,
                    message: format!("p95 latency {p95:.1}ms above critical {critical_ms:.1}ms"),
                })
            } else if p95 > *warning_ms {
                Some(Trigger {
                    severity: AlertSeverity::Warning,
                    value: p95,
                    message: format!("p95 latency {p95:.1}ms above warning {warning_ms:.1}ms"),
                })
            } else {
                None
            }
        }
        RuleKind::HighEvictionRate { warning_per_sec } => {
            let (first, last) = (window.first()?, latest);
            let elapsed = (last.timestamp - first.timestamp).num_seconds().max(1) as f64;
            let rate = last.counters.evictions.saturating_sub(first.counters.evictions) as f64 / elapsed;
            (rate > *warning_per_sec).then(|| Trigger {
                severity: AlertSeverity::Warning,
                value: rate,
                message: format!("eviction rate {rate:.1}/s above {warning_per_sec:.1}/s"),
            })
        }
        RuleKind::DynamicThreshold { metric, z_limit } => {
            let value = match metric {
                TrackedMetric::HitRate => latest.hit_rate,
                TrackedMetric::P95Latency => latest.latency.p95,
                TrackedMetric::ErrorRate => latest.error_rate,
                TrackedMetric::Qps => latest.qps,
            };
            let z = detector.z_score(*metric, value)?;
            (z.abs() > *z_limit).then(|| Trigger {
                severity: if z.abs() > z_limit * 1.25 { AlertSeverity::Critical } else { AlertSeverity::Warning },
                value,
                message: format!("{metric:?} z-score {z:.2} beyond limit {z_limit:.2}"),
            })
        }
    }
}

/// An alert instance, active or resolved.
#[derive(Debug, Clone)]
pub struct Alert {
    pub rule_id: String,
    pub name: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub current_value: f64,
    pub triggered_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn duration(&self) -> chrono::Duration {
        self.resolved_at.unwrap_or(self.triggered_at) - self.triggered_at
    }
}

/// Outcome of evaluating one rule this tick.
#[derive(Debug, Clone)]
pub enum AlertTransition {
    Triggered(Alert),
    Updated(Alert),
    Resolved(Alert),
}

/// Evaluates registered rules on an interval and tracks each rule's
/// active/resolved alert lifecycle.
pub struct AlertManager {
    rules: Vec<AlertRule>,
    active: HashMap<String, Alert>,
    resolved: VecDeque<Alert>,
    pub triggered_total: u64,
    pub resolved_total: u64,
}

impl AlertManager {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            active: HashMap::new(),
            resolved: VecDeque::new(),
            triggered_total: 0,
            resolved_total: 0,
        }
    }

    /// A manager preloaded with the built-in rules.
    pub fn with_builtin_rules() -> Self {
        let mut manager = Self::new();
        manager.register(AlertRule::new(
            "high-error-rate",
            "high error rate",
            RuleKind::HighErrorRate { threshold: 0.05 },
        ));
        manager.register(AlertRule::new(
            "low-hit-rate",
            "low hit rate",
            RuleKind::LowHitRate { warning: 0.70, critical: 0.50, min_requests: 100 },
        ));
        manager.register(AlertRule::new(
            "latency-spike",
            "latency spike",
            RuleKind::LatencySpike { warning_ms: 100.0, critical_ms: 200.0 },
        ));
        manager.register(AlertRule::new(
            "high-eviction-rate",
            "high eviction rate",
            RuleKind::HighEvictionRate { warning_per_sec: 10.0 },
        ));
        manager
    }

    pub fn register(&mut self, rule: AlertRule) {
        self.rules.push(rule);
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.active.values().cloned().collect()
    }

    pub fn resolved_alerts(&self) -> Vec<Alert> {
        self.resolved.iter().cloned().collect()
    }

    /// Evaluate every enabled rule against `window` (the trailing
    /// 1-minute window of snapshots), applying the active/resolved
    /// transition table.
    pub fn evaluate(&mut self, window: &[AggregateSnapshot], detector: &AnomalyDetector) -> Vec<AlertTransition> {
        let mut transitions = Vec::new();
        let Some(latest) = window.last() else {
            return transitions;
        };

        for rule in self.rules.iter().filter(|r| r.enabled) {
            let trigger = evaluate_rule(rule, window, detector);
            match (self.active.get_mut(&rule.id), trigger) {
                (None, Some(t)) => {
                    let alert = Alert {
                        rule_id: rule.id.clone(),
                        name: rule.name.clone(),
                        message: t.message,
                        severity: t.severity,
                        current_value: t.value,
                        triggered_at: latest.timestamp,
                        resolved_at: None,
                    };
                    self.active.insert(rule.id.clone(), alert.clone());
                    self.triggered_total += 1;
                    transitions.push(AlertTransition::Triggered(alert));
                }
                (Some(existing), Some(t)) => {
                    existing.current_value = t.value;
                    existing.message = t.message;
                    existing.severity = t.severity;
                    transitions.push(AlertTransition::Updated(existing.clone()));
                }
                (Some(_), None) => {
                    let mut alert = self.active.remove(&rule.id).expect("checked Some above");
                    alert.resolved_at = Some(latest.timestamp);
                    if self.resolved.len() == MAX_RESOLVED_HISTORY {
                        self.resolved.pop_front();
                    }
                    self.resolved.push_back(alert.clone());
                    self.resolved_total += 1;
                    transitions.push(AlertTransition::Resolved(alert));
                }
                (None, None) => {}
            }
        }

        transitions
    }
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::collector::{CounterSnapshot, Percentiles};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn snapshot(error_rate: f64, requests: u64, now: DateTime<Utc>) -> AggregateSnapshot {
        AggregateSnapshot {
            timestamp: now,
            counters: CounterSnapshot {
                hits: requests,
                misses: 0,
                ..Default::default()
            },
            hit_rate: 1.0,
            error_rate,
            qps: 10.0,
            latency: Percentiles::default(),
        }
    }

    #[test]
    fn high_error_rate_triggers_then_resolves() {
        let mut manager = AlertManager::with_builtin_rules();
        let detector = AnomalyDetector::new();

        let hot = vec![snapshot(0.10, 200, at(0))];
        let transitions = manager.evaluate(&hot, &detector);
        assert!(matches!(transitions[0], AlertTransition::Triggered(_)));
        assert_eq!(manager.active_alerts().len(), 1);

        let cool = vec![snapshot(0.01, 200, at(10))];
        let transitions = manager.evaluate(&cool, &detector);
        let resolved = transitions
            .into_iter()
            .find_map(|t| match t {
                AlertTransition::Resolved(a) => Some(a),
                _ => None,
            })
            .unwrap();
        assert!(resolved.duration() > chrono::Duration::zero());
        assert!(manager.active_alerts().is_empty());
        assert_eq!(manager.resolved_alerts().len(), 1);
    }

    #[test]
    fn low_hit_rate_ignored_below_min_requests() {
        let mut manager = AlertManager::new();
        manager.register(AlertRule::new(
            "low-hit-rate",
            "low hit rate",
            RuleKind::LowHitRate { warning: 0.70, critical: 0.50, min_requests: 100 },
        ));
        let detector = AnomalyDetector::new();

        let mut snap = snapshot(0.0, 10, at(0));
        snap.hit_rate = 0.1;
        let transitions = manager.evaluate(&[snap], &detector);
        assert!(transitions.is_empty());
    }

    #[test]
    fn eviction_rate_uses_window_span() {
        let mut manager = AlertManager::new();
        manager.register(AlertRule::new(
            "high-eviction-rate",
            "high eviction rate",
            RuleKind::HighEvictionRate { warning_per_sec: 10.0 },
        ));
        let detector = AnomalyDetector::new();

        let mut first = snapshot(0.0, 0, at(0));
        first.counters.evictions = 0;
        let mut last = snapshot(0.0, 0, at(10));
        last.counters.evictions = 200;

        let transitions = manager.evaluate(&[first, last], &detector);
        assert!(matches!(transitions[0], AlertTransition::Triggered(_)));
    }
}
