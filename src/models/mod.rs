//! Data models shared by the pool and the deduplication layer.
//!
//! This module re-exports the value types callers see: statistics snapshots,
//! health reports and query parameters.

pub mod query;
pub mod stats;

pub use query::QueryParam;
pub use stats::{DedupStats, HealthReport, PoolStats};
