//! Per-request query result cache.
//!
//! One [`QueryCache`] is attached lazily to each request context under
//! [`QUERY_CACHE_KEY`]. It maps a [`Fingerprint`] to the result of the first
//! execution and counts attempts, hits and misses for that request.
//!
//! # Design Decisions
//!
//! - **Results are type-erased**: entries hold `Arc<dyn Any>` and a hit
//!   requires the caller's `T` to match. A mismatch is treated as a miss and
//!   the new result replaces the old entry.
//! - **No in-flight coalescing**: two concurrent misses for the same key both
//!   run their executor. The last one to finish owns the entry.
//! - **No eviction**: the cache lives as long as the request context; only
//!   [`QueryCache::invalidate_tables`] and [`QueryCache::clear`] remove entries.

use crate::dedup::context::{RequestContext, get_or_attach};
use crate::dedup::fingerprint::Fingerprint;
use crate::models::{DedupStats, QueryParam};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Context key the cache is stored under.
pub const QUERY_CACHE_KEY: &str = "db_pool_core.query_cache";

/// Per-call options for [`dedup_query`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupOptions {
    /// Execute without reading or writing the cache.
    pub no_cache: bool,
    /// Tables the query reads, used by [`invalidate_tables`].
    pub tables: Vec<String>,
}

impl DedupOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_cache(mut self) -> Self {
        self.no_cache = true;
        self
    }

    pub fn tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables = tables.into_iter().map(Into::into).collect();
        self
    }
}

/// Outcome of a deduplicated query.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupResult<T> {
    pub data: T,
    /// `true` when the executor was not invoked.
    pub from_cache: bool,
    /// Fingerprint key, empty when the cache was bypassed.
    pub cache_key: String,
}

/// Public view of a cache entry.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntryInfo {
    pub key: String,
    pub query: String,
    pub created_at: DateTime<Utc>,
    pub tables: Vec<String>,
}

struct CacheEntry {
    value: Arc<dyn Any + Send + Sync>,
    created_at: DateTime<Utc>,
    /// Lowercased.
    tables: Vec<String>,
    fingerprint: Fingerprint,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    total: u64,
    hits: u64,
    misses: u64,
}

/// Query results and counters for one logical request.
#[derive(Default)]
pub struct QueryCache {
    state: Mutex<CacheState>,
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("QueryCache")
            .field("entries", &state.entries.len())
            .field("total", &state.total)
            .field("hits", &state.hits)
            .field("misses", &state.misses)
            .finish()
    }
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the cached result for `query`/`params`, or run `executor` and cache it.
    ///
    /// Executor errors are returned as-is and leave the cache untouched.
    pub async fn dedup<T, E, F, Fut>(
        &self,
        query: &str,
        params: &[QueryParam],
        executor: F,
        options: DedupOptions,
    ) -> Result<DedupResult<T>, E>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.lock().total += 1;

        if options.no_cache {
            let data = executor().await?;
            self.lock().misses += 1;
            return Ok(DedupResult {
                data,
                from_cache: false,
                cache_key: String::new(),
            });
        }

        let fingerprint = Fingerprint::new(query, params);
        if let Some(data) = self.lookup::<T>(&fingerprint) {
            debug!(key = %fingerprint, "Query served from cache");
            return Ok(DedupResult {
                data,
                from_cache: true,
                cache_key: fingerprint.key().to_string(),
            });
        }

        let data = executor().await?;
        let cache_key = fingerprint.key().to_string();
        let entry = CacheEntry {
            value: Arc::new(data.clone()),
            created_at: Utc::now(),
            tables: options.tables.iter().map(|t| t.to_lowercase()).collect(),
            fingerprint,
        };
        {
            let mut state = self.lock();
            state.misses += 1;
            state.entries.insert(cache_key.clone(), entry);
        }
        debug!(key = %cache_key, "Query executed and cached");

        Ok(DedupResult {
            data,
            from_cache: false,
            cache_key,
        })
    }

    /// Count a hit and clone the stored value if the entry really matches.
    fn lookup<T: Clone + 'static>(&self, fingerprint: &Fingerprint) -> Option<T> {
        let mut state = self.lock();
        let data = {
            let entry = state.entries.get(fingerprint.key())?;
            if !entry.fingerprint.same_source(fingerprint) {
                debug!(key = %fingerprint, "Fingerprint collision, treating as miss");
                return None;
            }
            entry.value.downcast_ref::<T>()?.clone()
        };
        state.hits += 1;
        Some(data)
    }

    /// Remove entries tagged with any of `tables` (case-insensitive).
    ///
    /// Returns the number of entries removed. Untagged entries are kept.
    pub fn invalidate_tables<S: AsRef<str>>(&self, tables: &[S]) -> usize {
        let targets: HashSet<String> = tables.iter().map(|t| t.as_ref().to_lowercase()).collect();
        if targets.is_empty() {
            return 0;
        }

        let mut state = self.lock();
        let before = state.entries.len();
        state
            .entries
            .retain(|_, entry| !entry.tables.iter().any(|t| targets.contains(t)));
        let removed = before - state.entries.len();
        if removed > 0 {
            debug!(removed, tables = ?targets, "Invalidated cached queries");
        }
        removed
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn stats(&self) -> DedupStats {
        let state = self.lock();
        DedupStats::from_counts(state.total, state.hits, state.misses)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Snapshot of the cached entries, oldest first.
    pub fn entries(&self) -> Vec<CacheEntryInfo> {
        let state = self.lock();
        let mut entries: Vec<_> = state
            .entries
            .iter()
            .map(|(key, entry)| CacheEntryInfo {
                key: key.clone(),
                query: entry.fingerprint.normalized_query().to_string(),
                created_at: entry.created_at,
                tables: entry.tables.clone(),
            })
            .collect();
        entries.sort_by_key(|e| e.created_at);
        entries
    }
}

/// The cache attached to `ctx`, created on first use.
pub fn query_cache<C: RequestContext + ?Sized>(ctx: &C) -> Arc<QueryCache> {
    get_or_attach(ctx, QUERY_CACHE_KEY, QueryCache::new)
}

/// Run `executor` at most once per distinct query within the request `ctx`.
pub async fn dedup_query<C, T, E, F, Fut>(
    ctx: &C,
    query: &str,
    params: &[QueryParam],
    executor: F,
    options: DedupOptions,
) -> Result<DedupResult<T>, E>
where
    C: RequestContext + ?Sized,
    T: Clone + Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let cache = query_cache(ctx);
    cache.dedup(query, params, executor, options).await
}

/// Invalidate cached reads of `tables` after a write in `ctx`.
pub fn invalidate_tables<C, S>(ctx: &C, tables: &[S]) -> usize
where
    C: RequestContext + ?Sized,
    S: AsRef<str>,
{
    query_cache(ctx).invalidate_tables(tables)
}

/// Empty the cache of `ctx`, keeping its statistics.
pub fn clear_query_cache<C: RequestContext + ?Sized>(ctx: &C) {
    query_cache(ctx).clear();
}

/// Deduplication counters for `ctx`.
pub fn dedup_stats<C: RequestContext + ?Sized>(ctx: &C) -> DedupStats {
    query_cache(ctx).stats()
}
