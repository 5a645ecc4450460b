//! Pool configuration, presets and the simulator's command line.
//!
//! [`PoolConfig`] is the immutable value a pool is built from. [`PoolOptions`]
//! carries partial overrides (from a config file, the CLI, or an embedding
//! application) that are resolved against a [`Preset`].

use crate::error::{PoolError, PoolResult};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// Server preset defaults
pub const DEFAULT_MIN_CONNECTIONS: usize = 2;
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_ACQUIRE_RETRIES: u32 = 3;

// Edge runtimes hold at most one connection and never keep it warm
pub const EDGE_MAX_CONNECTIONS: usize = 1;
pub const EDGE_ACQUIRE_TIMEOUT_MS: u64 = 5_000;
pub const EDGE_ACQUIRE_RETRIES: u32 = 2;

// Serverless functions live briefly, so idle connections go quickly
pub const SERVERLESS_MAX_CONNECTIONS: usize = 5;
pub const SERVERLESS_IDLE_TIMEOUT_MS: u64 = 5_000;

/// Immutable pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Idle connections to keep. Informational only, the pool never pre-warms.
    pub min: usize,
    /// Upper bound on connections the pool holds (idle + active + in flight).
    pub max: usize,
    /// Idle connections are destroyed after this long. Zero disables eviction.
    #[serde(rename = "idle_timeout_ms", with = "duration_ms")]
    pub idle_timeout: Duration,
    /// How long a waiter blocks before failing with a timeout.
    #[serde(rename = "acquire_timeout_ms", with = "duration_ms")]
    pub acquire_timeout: Duration,
    /// Attempts made when creating a connection.
    pub acquire_retries: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_CONNECTIONS,
            max: DEFAULT_MAX_CONNECTIONS,
            idle_timeout: Duration::from_millis(DEFAULT_IDLE_TIMEOUT_MS),
            acquire_timeout: Duration::from_millis(DEFAULT_ACQUIRE_TIMEOUT_MS),
            acquire_retries: DEFAULT_ACQUIRE_RETRIES,
        }
    }
}

impl PoolConfig {
    /// Long-running server preset (same as `Default`).
    pub fn server() -> Self {
        Self::default()
    }

    /// Edge preset: a single connection, no idle retention.
    pub fn edge() -> Self {
        Self {
            min: 0,
            max: EDGE_MAX_CONNECTIONS,
            idle_timeout: Duration::ZERO,
            acquire_timeout: Duration::from_millis(EDGE_ACQUIRE_TIMEOUT_MS),
            acquire_retries: EDGE_ACQUIRE_RETRIES,
        }
    }

    /// Serverless preset: a few connections with a short idle window.
    pub fn serverless() -> Self {
        Self {
            min: 0,
            max: SERVERLESS_MAX_CONNECTIONS,
            idle_timeout: Duration::from_millis(SERVERLESS_IDLE_TIMEOUT_MS),
            ..Self::default()
        }
    }

    /// Set the maximum number of connections.
    pub fn max(mut self, max: usize) -> Self {
        self.max = max;
        self
    }

    /// Set the informational minimum.
    pub fn min(mut self, min: usize) -> Self {
        self.min = min;
        self
    }

    /// Set the idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the acquire timeout.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the number of creation attempts.
    pub fn acquire_retries(mut self, retries: u32) -> Self {
        self.acquire_retries = retries;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> PoolResult<()> {
        if self.max == 0 {
            return Err(PoolError::invalid_config("max must be greater than 0"));
        }
        if self.min > self.max {
            return Err(PoolError::invalid_config(format!(
                "min ({}) cannot exceed max ({})",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Named configuration presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// Long-running server process
    #[default]
    Server,
    /// Edge runtime with a single short-lived connection
    Edge,
    /// Serverless function
    Serverless,
}

impl Preset {
    /// The configuration this preset stands for.
    pub fn config(self) -> PoolConfig {
        match self {
            Self::Server => PoolConfig::server(),
            Self::Edge => PoolConfig::edge(),
            Self::Serverless => PoolConfig::serverless(),
        }
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Edge => write!(f, "edge"),
            Self::Serverless => write!(f, "serverless"),
        }
    }
}

/// Partial pool overrides. Unset fields fall back to the chosen preset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolOptions {
    pub min_connections: Option<usize>,
    pub max_connections: Option<usize>,
    pub idle_timeout_ms: Option<u64>,
    pub acquire_timeout_ms: Option<u64>,
    pub acquire_retries: Option<u32>,
}

impl PoolOptions {
    /// Get min_connections, falling back to the preset.
    pub fn min_connections_or(&self, preset: &PoolConfig) -> usize {
        self.min_connections.unwrap_or(preset.min)
    }

    /// Get max_connections, falling back to the preset.
    pub fn max_connections_or(&self, preset: &PoolConfig) -> usize {
        self.max_connections.unwrap_or(preset.max)
    }

    /// Get idle_timeout, falling back to the preset.
    pub fn idle_timeout_or(&self, preset: &PoolConfig) -> Duration {
        self.idle_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(preset.idle_timeout)
    }

    /// Get acquire_timeout, falling back to the preset.
    pub fn acquire_timeout_or(&self, preset: &PoolConfig) -> Duration {
        self.acquire_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(preset.acquire_timeout)
    }

    /// Get acquire_retries, falling back to the preset.
    pub fn acquire_retries_or(&self, preset: &PoolConfig) -> u32 {
        self.acquire_retries.unwrap_or(preset.acquire_retries)
    }

    /// Apply these overrides on top of a preset and validate the result.
    pub fn resolve(&self, preset: Preset) -> PoolResult<PoolConfig> {
        let base = preset.config();
        let config = PoolConfig {
            min: self.min_connections_or(&base),
            max: self.max_connections_or(&base),
            idle_timeout: self.idle_timeout_or(&base),
            acquire_timeout: self.acquire_timeout_or(&base),
            acquire_retries: self.acquire_retries_or(&base),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Serde helpers storing a `Duration` as whole milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Command line of the `db-pool-sim` load simulator.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "db-pool-sim",
    about = "Drive a connection pool and per-request query deduplication with a simulated workload",
    version,
    author
)]
pub struct Config {
    /// Configuration preset the overrides below apply to
    #[arg(long, value_enum, default_value = "server", env = "POOL_PRESET")]
    pub preset: Preset,

    /// Maximum connections (overrides the preset)
    #[arg(long, env = "POOL_MAX_CONNECTIONS")]
    pub max_connections: Option<usize>,

    /// Minimum connections (overrides the preset)
    #[arg(long, env = "POOL_MIN_CONNECTIONS")]
    pub min_connections: Option<usize>,

    /// Idle timeout in milliseconds (overrides the preset)
    #[arg(long, env = "POOL_IDLE_TIMEOUT_MS")]
    pub idle_timeout_ms: Option<u64>,

    /// Acquire timeout in milliseconds (overrides the preset)
    #[arg(long, env = "POOL_ACQUIRE_TIMEOUT_MS")]
    pub acquire_timeout_ms: Option<u64>,

    /// Connection creation attempts (overrides the preset)
    #[arg(long, env = "POOL_ACQUIRE_RETRIES")]
    pub acquire_retries: Option<u32>,

    /// Number of concurrent workers
    #[arg(short, long, default_value_t = 8)]
    pub workers: usize,

    /// Logical requests each worker runs
    #[arg(short, long, default_value_t = 10)]
    pub requests: usize,

    /// Queries issued per request (half of them repeat an earlier one)
    #[arg(long, default_value_t = 6)]
    pub queries_per_request: usize,

    /// How long each request holds its connection, in milliseconds
    #[arg(long, default_value_t = 20)]
    pub hold_ms: u64,

    /// Simulated connection creation latency, in milliseconds
    #[arg(long, default_value_t = 5)]
    pub create_latency_ms: u64,

    /// Probability (0.0 - 1.0) that a connection creation fails transiently
    #[arg(long, default_value_t = 0.0)]
    pub create_failure_rate: f64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "POOL_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "POOL_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Collect the pool overrides given on the command line.
    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            min_connections: self.min_connections,
            max_connections: self.max_connections,
            idle_timeout_ms: self.idle_timeout_ms,
            acquire_timeout_ms: self.acquire_timeout_ms,
            acquire_retries: self.acquire_retries,
        }
    }

    /// Resolve the pool configuration for this run.
    pub fn pool_config(&self) -> PoolResult<PoolConfig> {
        self.pool_options().resolve(self.preset)
    }
}
