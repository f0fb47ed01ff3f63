//! Crate-wide error types
//!
//! Each engine defines its own leaf error enum; [`CachePlaneError`] composes
//! them the way `enterprise::error::EnterpriseError` composes its module
//! errors, so callers crossing engine boundaries (e.g. the service facade)
//! can propagate with a single `?`.

use thiserror::Error;

/// Errors surfaced by the L1 store / coalescer / pattern matcher and the
/// read-through / write-through cache manager (C1-C4).
#[derive(Error, Debug)]
pub enum CacheError {
    /// Empty key, oversized pattern, or other malformed input.
    #[error("validation error: {0}")]
    Validation(String),

    /// No origin fetcher configured for a key that missed L1 and L2.
    #[error("cache not initialized: {0}")]
    NotInitialized(String),

    /// Origin reported the key does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Origin or L2 I/O failed.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// L2 envelope (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors surfaced by the invalidation coordinator (C5).
#[derive(Error, Debug)]
pub enum InvalidationError {
    /// Both `keys` and `pattern` were empty.
    #[error("validation error: {0}")]
    Validation(String),

    /// Publishing the invalidation event failed; the only error fatal to
    /// the caller per the propagation policy.
    #[error("publish error: {0}")]
    Publish(String),

    /// The audit sink rejected or failed to persist a record. Never
    /// returned to the caller — swallowed and counted per the
    /// propagation policy (spec §7 "audit-write error is swallowed and
    /// counted").
    #[error("audit write error: {0}")]
    AuditWrite(String),
}

/// Errors surfaced by the warming strategies, predictor, and worker pool
/// (C6-C9).
#[derive(Error, Debug)]
pub enum WarmingError {
    /// The origin-facing token bucket has no tokens and the caller's
    /// deadline was reached before one freed up.
    #[error("rate limited: retry after {0:?}")]
    RateLimited(std::time::Duration),

    /// The origin fetch exceeded `OriginTimeout`.
    #[error("timeout fetching {0}")]
    Timeout(String),

    /// The emergency-stop latch is set; the task was rejected without
    /// attempting origin I/O.
    #[error("emergency stop active")]
    EmergencyStopActive,

    /// Origin fetch failed after exhausting retries.
    #[error("fetch error: {0}")]
    Fetch(String),
}

/// Crate-wide error, composed from each engine's leaf error.
#[derive(Error, Debug)]
pub enum CachePlaneError {
    /// Error from the cache manager / L1 store.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Error from the invalidation coordinator.
    #[error("invalidation error: {0}")]
    Invalidation(#[from] InvalidationError),

    /// Error from the warming engine.
    #[error("warming error: {0}")]
    Warming(#[from] WarmingError),

    /// Configuration failed to load or validate.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result alias for the cache manager.
pub type CacheResult<T> = Result<T, CacheError>;
/// Result alias for the invalidation coordinator.
pub type InvalidationResult<T> = Result<T, InvalidationError>;
/// Result alias for the warming engine.
pub type WarmingResult<T> = Result<T, WarmingError>;
/// Result alias for crate-wide operations.
pub type CachePlaneResult<T> = Result<T, CachePlaneError>;
