//! Named pools owned by the application.
//!
//! Replaces a process-wide default lookup: the application creates one
//! registry, passes it to whatever needs a pool, and closes it at shutdown.
//! Several registries can coexist (e.g. one per test).

use crate::error::{PoolError, PoolResult};
use crate::models::PoolStats;
use crate::pool::adapter::ConnectionAdapter;
use crate::pool::connection_pool::Pool;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Registry entry summary (no adapter state exposed).
#[derive(Debug, Clone, Serialize)]
pub struct PoolSummary {
    pub name: String,
    pub stats: PoolStats,
}

pub struct PoolRegistry<A: ConnectionAdapter> {
    pools: Arc<RwLock<HashMap<String, Pool<A>>>>,
}

impl<A: ConnectionAdapter> Clone for PoolRegistry<A> {
    fn clone(&self) -> Self {
        Self {
            pools: Arc::clone(&self.pools),
        }
    }
}

impl<A: ConnectionAdapter> std::fmt::Debug for PoolRegistry<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry").finish_non_exhaustive()
    }
}

impl<A: ConnectionAdapter> PoolRegistry<A> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            pools: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a pool under `name`.
    pub async fn register(&self, name: impl Into<String>, pool: Pool<A>) -> PoolResult<()> {
        let name = name.into();
        let mut pools = self.pools.write().await;
        if pools.contains_key(&name) {
            return Err(PoolError::pool_exists(name));
        }
        info!(pool = %name, max = pool.config().max, "Registered pool");
        pools.insert(name, pool);
        Ok(())
    }

    /// Get a pool by name.
    pub async fn get(&self, name: &str) -> PoolResult<Pool<A>> {
        let pools = self.pools.read().await;
        pools
            .get(name)
            .cloned()
            .ok_or_else(|| PoolError::pool_not_found(name))
    }

    /// Check if a pool exists.
    pub async fn exists(&self, name: &str) -> bool {
        self.pools.read().await.contains_key(name)
    }

    /// Unregister a pool and close it.
    pub async fn remove(&self, name: &str) -> PoolResult<()> {
        let pool = {
            let mut pools = self.pools.write().await;
            pools
                .remove(name)
                .ok_or_else(|| PoolError::pool_not_found(name))?
        }; // Lock released here

        info!(pool = %name, "Closing pool");
        pool.close().await;
        Ok(())
    }

    /// List registered pool names.
    pub async fn names(&self) -> Vec<String> {
        self.pools.read().await.keys().cloned().collect()
    }

    /// Stats for every registered pool.
    pub async fn summaries(&self) -> Vec<PoolSummary> {
        let pools = self.pools.read().await;
        pools
            .iter()
            .map(|(name, pool)| PoolSummary {
                name: name.clone(),
                stats: pool.stats(),
            })
            .collect()
    }

    /// Get the number of registered pools.
    pub async fn len(&self) -> usize {
        self.pools.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pools.read().await.is_empty()
    }

    /// Close every pool and clear the registry.
    pub async fn close_all(&self) {
        // Drain under lock, close outside lock
        let drained: Vec<_> = {
            let mut pools = self.pools.write().await;
            pools.drain().collect()
        };

        for (name, pool) in drained {
            info!(pool = %name, "Closing pool");
            pool.close().await;
        }
        info!("All pools closed");
    }
}

impl<A: ConnectionAdapter> Default for PoolRegistry<A> {
    fn default() -> Self {
        Self::new()
    }
}
