//! # Cache Plane
//!
//! A distributed, multi-level cache plane: a read-through/write-through
//! cache manager with stampede protection, a pattern-based invalidation
//! coordinator, a predictive/scheduled warming engine under origin rate
//! limits, and a lock-light monitoring pipeline with windowed
//! aggregation, anomaly detection, and alerting.
//!
//! ## Architecture
//!
//! - `l1`: in-process LRU store, pattern matcher, request coalescer
//! - `manager`: read-through/write-through orchestration over L1/L2/origin
//! - `invalidation`: deduplicated, audited, pub/sub-fanned invalidation
//! - `pubsub`: the in-process invalidation event bus
//! - `warming`: strategies, hot-key predictor, worker pool, scheduler
//! - `monitoring`: metric collection, aggregation, anomaly detection, alerting
//! - `service`: wires every engine together and owns background task lifecycle
//! - `config`: the serde-friendly configuration surface
//! - `error`: crate-wide error types

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Crate-wide configuration surface.
pub mod config;

/// Crate-wide error types.
pub mod error;

/// L1 store, pattern matcher, and request coalescer (C1-C3).
pub mod l1;

/// Cache manager: read-through/write-through orchestration (C4).
pub mod manager;

/// Invalidation coordinator (C5).
pub mod invalidation;

/// In-process invalidation event bus.
pub mod pubsub;

/// Warming engine: strategies, predictor, worker pool, scheduler (C6-C9).
pub mod warming;

/// Monitoring pipeline: collector, aggregator, anomaly detector, alerting (C10-C13).
pub mod monitoring;

/// Service facade wiring every engine together.
pub mod service;

pub use config::{CachePlaneConfig, L1Config, MonitoringConfig, WarmingConfig};
pub use error::{CacheError, CachePlaneError, InvalidationError, WarmingError};
pub use service::CachePlaneService;

/// Crate version, from `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name, from `Cargo.toml`.
pub const NAME: &str = env!("CARGO_PKG_NAME");
