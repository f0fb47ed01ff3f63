//! Cache plane configuration surface
//!
//! Mirrors `enterprise::config::EnterpriseConfig`: a flat, serde-friendly
//! struct with a `Default` impl holding the spec's documented constants,
//! loadable from / savable to JSON.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// Top-level configuration for the cache plane service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachePlaneConfig {
    /// L1 store configuration.
    pub l1: L1Config,
    /// Warming engine configuration.
    pub warming: WarmingConfig,
    /// Monitoring pipeline configuration.
    pub monitoring: MonitoringConfig,
}

impl Default for CachePlaneConfig {
    fn default() -> Self {
        Self {
            l1: L1Config::default(),
            warming: WarmingConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl CachePlaneConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: CachePlaneConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// L1 store and cache manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct L1Config {
    /// Maximum number of entries held in L1 before LRU eviction kicks in.
    pub l1_max_entries: usize,
    /// Default TTL applied when a caller doesn't specify one.
    #[serde(with = "duration_secs")]
    pub default_ttl: Duration,
    /// Interval between background `CleanupExpired` sweeps.
    #[serde(with = "duration_secs")]
    pub cleanup_interval: Duration,
    /// Whether the L2 remote-cache tier is consulted on L1 miss.
    pub l2_enabled: bool,
}

impl Default for L1Config {
    fn default() -> Self {
        Self {
            l1_max_entries: 10_000,
            default_ttl: secs(3600),
            cleanup_interval: secs(60),
            l2_enabled: false,
        }
    }
}

/// Warming engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmingConfig {
    /// Maximum sustained origin requests per second across all warmers.
    pub max_origin_rps: u64,
    /// Number of concurrent warming workers.
    pub concurrent_warmers: usize,
    /// Maximum number of tasks accepted by a single `QueueTasks` call.
    pub max_batch_size: usize,
    /// Deadline for a single origin fetch.
    #[serde(with = "duration_millis")]
    pub origin_timeout: Duration,
    /// Number of retry attempts before a task is marked failed.
    pub retry_attempts: u32,
    /// Base delay for exponential backoff with jitter.
    #[serde(with = "duration_millis")]
    pub backoff_base: Duration,
    /// Fetch duration above which the emergency-stop latch is set.
    #[serde(with = "duration_millis")]
    pub emergency_threshold: Duration,
    /// Strategy used when a warm request doesn't name one.
    pub default_strategy: String,
}

impl Default for WarmingConfig {
    fn default() -> Self {
        Self {
            max_origin_rps: 100,
            concurrent_warmers: 10,
            max_batch_size: 50,
            origin_timeout: secs(5),
            retry_attempts: 3,
            backoff_base: millis(100),
            emergency_threshold: secs(2),
            default_strategy: "priority".to_string(),
        }
    }
}

/// Monitoring pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// How long time-series buckets are retained before GC.
    #[serde(with = "duration_secs")]
    pub metrics_retention: Duration,
    /// Aggregation tick period.
    #[serde(with = "duration_secs")]
    pub aggregation_window: Duration,
    /// Alert rule evaluation period.
    #[serde(with = "duration_secs")]
    pub alert_eval_interval: Duration,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_retention: secs(3600),
            aggregation_window: secs(1),
            alert_eval_interval: secs(10),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let config = CachePlaneConfig::default();
        assert_eq!(config.l1.l1_max_entries, 10_000);
        assert_eq!(config.l1.default_ttl, secs(3600));
        assert_eq!(config.warming.max_origin_rps, 100);
        assert_eq!(config.warming.concurrent_warmers, 10);
        assert_eq!(config.monitoring.metrics_retention, secs(3600));
    }

    #[test]
    fn round_trips_through_json() {
        let config = CachePlaneConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: CachePlaneConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.l1.l1_max_entries, config.l1.l1_max_entries);
    }
}
