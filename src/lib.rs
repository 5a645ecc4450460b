//! Database Pool Core Library
//!
//! This library provides a bounded, adapter-driven connection pool with
//! retrying creation and idle eviction, plus request-scoped deduplication of
//! identical read queries.

pub mod config;
pub mod dedup;
pub mod error;
pub mod models;
pub mod pool;
pub mod retry;

pub use config::{Config, PoolConfig, PoolOptions, Preset};
pub use dedup::{DedupOptions, DedupResult, RequestContext, RequestScope, dedup_query};
pub use error::{PoolError, PoolResult};
pub use pool::{ConnectionAdapter, Pool, PoolRegistry, PooledConnection};
pub use retry::{RetryConfig, with_retry, with_retry_if};
