//! Request-scoped query deduplication.
//!
//! Reads issued within one logical request are keyed by a [`Fingerprint`] of
//! their normalized text and parameters. The first execution is cached in the
//! request's [`RequestContext`]; later identical reads return the cached value.
//! Writes call [`invalidate_tables`] to drop the reads they affect.

pub mod cache;
pub mod context;
pub mod fingerprint;

pub use cache::{
    CacheEntryInfo, DedupOptions, DedupResult, QUERY_CACHE_KEY, QueryCache, clear_query_cache,
    dedup_query, dedup_stats, invalidate_tables, query_cache,
};
pub use context::{ContextValue, RequestContext, RequestScope};
pub use fingerprint::Fingerprint;
