//! Invalidation audit trail
//!
//! Grounded on `enterprise::cache::invalidation::InvalidationReason` /
//! `InvalidationMetadata`, reshaped into a single owned record suitable
//! for handing to an [`crate::manager::adapters::AuditSink`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why an invalidation happened, carried through to the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Explicit caller-initiated invalidation.
    Explicit,
    /// Triggered by a detected upstream data change.
    DataChanged,
    /// Cascaded from another invalidation.
    Cascade,
    /// Triggered by policy (e.g. scheduled purge).
    Policy,
}

/// What was targeted by an invalidation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InvalidationTarget {
    /// Exact keys.
    Keys(Vec<String>),
    /// A single pattern (spec §4.3 classes).
    Pattern(String),
}

/// One durable record of an invalidation, independent of whether it
/// matched zero or many keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationRecord {
    /// Unique id for this invalidation request, used for idempotency and
    /// audit correlation (spec §4.5).
    pub request_id: Uuid,
    /// What was invalidated.
    pub target: InvalidationTarget,
    /// Why.
    pub reason: InvalidationReason,
    /// Number of L1 entries actually removed.
    pub keys_removed: usize,
    /// When the invalidation was processed.
    pub occurred_at: DateTime<Utc>,
    /// Free-form source identifier (service name, admin user, etc.).
    pub source: Option<String>,
}
