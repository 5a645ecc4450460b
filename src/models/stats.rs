//! Statistics and health snapshots.

use serde::Serialize;
use std::time::Duration;

/// Point-in-time view of a pool.
///
/// `total` is always `active + idle`. `created` and `closed` only grow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Connections held by callers.
    pub active: usize,
    /// Connections parked in the idle list.
    pub idle: usize,
    /// `active + idle`.
    pub total: usize,
    /// Callers queued for a connection.
    pub waiting: usize,
    /// Connections currently being created or validated.
    pub pending: usize,
    /// Connections created since the pool was built.
    pub created: u64,
    /// Connections destroyed since the pool was built.
    pub closed: u64,
}

/// Deduplication counters for one logical request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DedupStats {
    pub total: u64,
    /// Cache hits.
    pub deduplicated: u64,
    /// Cache misses.
    pub unique: u64,
    /// `deduplicated / total`, or 0 when nothing ran.
    pub hit_rate: f64,
}

impl DedupStats {
    /// Build a snapshot from raw counters.
    pub fn from_counts(total: u64, hits: u64, misses: u64) -> Self {
        let hit_rate = if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        };
        Self {
            total,
            deduplicated: hits,
            unique: misses,
            hit_rate,
        }
    }
}

/// Result of [`Pool::health_check`](crate::pool::Pool::health_check).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    /// Time spent acquiring, validating and releasing.
    #[serde(rename = "latency_ms", serialize_with = "serialize_millis")]
    pub latency: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn serialize_millis<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}
