//! DB Pool Simulator - Main entry point.
//!
//! Drives a connection pool backed by the in-memory adapter with concurrent
//! workers. Each worker runs logical requests that hold a connection while
//! issuing repeated reads through the per-request deduplication cache. A JSON
//! report with pool stats, dedup stats and a health check is printed at the end.

use db_pool_core::config::Config;
use db_pool_core::dedup::{self, DedupOptions, RequestScope};
use db_pool_core::models::{DedupStats, QueryParam};
use db_pool_core::pool::{MemoryAdapter, Pool, PoolRegistry};
use db_pool_core::{PoolError, PoolResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const POOL_NAME: &str = "main";
const ITEM_QUERY: &str = "SELECT * FROM items WHERE id = ?";

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

/// Counters shared by all workers.
#[derive(Default)]
struct Totals {
    requests: AtomicU64,
    failed: AtomicU64,
    timeouts: AtomicU64,
    queries: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidated: AtomicU64,
}

impl Totals {
    fn record(&self, stats: DedupStats) {
        self.queries.fetch_add(stats.total, Ordering::Relaxed);
        self.hits.fetch_add(stats.deduplicated, Ordering::Relaxed);
        self.misses.fetch_add(stats.unique, Ordering::Relaxed);
    }

    fn dedup_stats(&self) -> DedupStats {
        DedupStats::from_counts(
            self.queries.load(Ordering::Relaxed),
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

/// One logical request: acquire, read with deduplication, write, release.
async fn run_request(
    pool: &Pool<MemoryAdapter>,
    config: &Config,
    totals: &Totals,
) -> PoolResult<()> {
    let scope = RequestScope::new();
    let conn = pool.acquire().await?;
    let serial = conn.serial;
    let distinct = config.queries_per_request.div_ceil(2).max(1);

    for i in 0..config.queries_per_request {
        let id = (i % distinct) as i64;
        let result = dedup::dedup_query(
            &scope,
            ITEM_QUERY,
            &[QueryParam::from(id)],
            || fetch_item(serial, id),
            DedupOptions::new().tables(["items"]),
        )
        .await;
        match result {
            Ok(row) => debug!(
                request = %scope.id(),
                from_cache = row.from_cache,
                key = %row.cache_key,
                "Read item"
            ),
            Err(e) => warn!(request = %scope.id(), error = %e, "Read failed"),
        }
    }

    tokio::time::sleep(Duration::from_millis(config.hold_ms)).await;

    let invalidated = dedup::invalidate_tables(&scope, &["items"]);
    totals
        .invalidated
        .fetch_add(invalidated as u64, Ordering::Relaxed);

    totals.record(dedup::dedup_stats(&scope));
    pool.release(conn);
    Ok(())
}

async fn fetch_item(serial: u64, id: i64) -> Result<String, PoolError> {
    tokio::time::sleep(Duration::from_millis(1)).await;
    Ok(format!("item {id} via connection {serial}"))
}

async fn run_worker(
    worker: usize,
    pool: Pool<MemoryAdapter>,
    config: Arc<Config>,
    totals: Arc<Totals>,
) {
    for _ in 0..config.requests {
        totals.requests.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = run_request(&pool, &config, &totals).await {
            totals.failed.fetch_add(1, Ordering::Relaxed);
            if e.is_timeout() {
                totals.timeouts.fetch_add(1, Ordering::Relaxed);
            }
            warn!(worker, error = %e, "Request failed");
        }
    }
    debug!(worker, "Worker finished");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Arc::new(Config::parse_args());

    // Initialize logging
    init_tracing(&config);

    let pool_config = config.pool_config()?;
    info!(
        preset = %config.preset,
        max = pool_config.max,
        workers = config.workers,
        requests = config.requests,
        "Starting DB Pool Simulator v{}",
        env!("CARGO_PKG_VERSION")
    );

    let adapter = MemoryAdapter::new()
        .with_create_latency(Duration::from_millis(config.create_latency_ms))
        .with_failure_rate(config.create_failure_rate);

    let registry: PoolRegistry<MemoryAdapter> = PoolRegistry::new();
    registry
        .register(POOL_NAME, Pool::new(adapter, pool_config)?)
        .await?;
    let pool = registry.get(POOL_NAME).await?;

    let totals = Arc::new(Totals::default());
    let started = Instant::now();
    let handles: Vec<_> = (0..config.workers)
        .map(|worker| {
            tokio::spawn(run_worker(
                worker,
                pool.clone(),
                Arc::clone(&config),
                Arc::clone(&totals),
            ))
        })
        .collect();

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Worker panicked");
        }
    }
    let elapsed = started.elapsed();

    let health = pool.health_check().await;
    let report = serde_json::json!({
        "preset": config.preset,
        "config": pool.config(),
        "elapsed_ms": elapsed.as_millis() as u64,
        "requests": totals.requests.load(Ordering::Relaxed),
        "failed_requests": totals.failed.load(Ordering::Relaxed),
        "timeouts": totals.timeouts.load(Ordering::Relaxed),
        "connections_created": pool.adapter().created_count(),
        "creation_attempts": pool.adapter().create_attempts(),
        "invalidated_entries": totals.invalidated.load(Ordering::Relaxed),
        "pools": registry.summaries().await,
        "dedup": totals.dedup_stats(),
        "health": health,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    registry.close_all().await;
    info!(closed = pool.stats().closed, "Simulation complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim_config(args: &[&str]) -> Config {
        use clap::Parser;
        let mut argv = vec!["db-pool-sim"];
        argv.extend_from_slice(args);
        Config::parse_from(argv)
    }

    #[tokio::test]
    async fn test_request_dedups_repeated_reads() {
        let config = sim_config(&["--queries-per-request", "6", "--hold-ms", "0"]);
        let pool = Pool::new(MemoryAdapter::new(), config.pool_config().unwrap()).unwrap();
        let totals = Totals::default();

        run_request(&pool, &config, &totals).await.unwrap();

        let stats = totals.dedup_stats();
        assert_eq!(stats.total, 6);
        assert_eq!(stats.unique, 3);
        assert_eq!(stats.deduplicated, 3);
        assert_eq!(totals.invalidated.load(Ordering::Relaxed), 3);
        assert_eq!(pool.stats().idle, 1);
    }

    #[tokio::test]
    async fn test_worker_counts_failures() {
        let config = Arc::new(sim_config(&["--requests", "2", "--hold-ms", "0"]));
        let pool = Pool::new(MemoryAdapter::new(), config.pool_config().unwrap()).unwrap();
        pool.close().await;
        let totals = Arc::new(Totals::default());

        run_worker(0, pool, Arc::clone(&config), Arc::clone(&totals)).await;

        assert_eq!(totals.requests.load(Ordering::Relaxed), 2);
        assert_eq!(totals.failed.load(Ordering::Relaxed), 2);
        assert_eq!(totals.timeouts.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_fetch_item_shape() {
        let row = tokio_test::block_on(fetch_item(4, 2)).unwrap();
        assert_eq!(row, "item 2 via connection 4");
    }
}
