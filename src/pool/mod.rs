//! Connection pooling.
//!
//! This module provides the pool and its collaborators:
//! - The adapter strategy a driver binding implements
//! - The bounded pool with FIFO waiters and idle eviction
//! - Connection handles
//! - A registry of named pools
//! - An in-memory adapter for tests and simulation

pub mod adapter;
pub mod connection_pool;
pub mod handle;
pub mod memory;
pub mod registry;

pub use adapter::ConnectionAdapter;
pub use connection_pool::Pool;
pub use handle::{ConnectionId, PooledConnection};
pub use memory::{MemoryAdapter, MemoryConnection, MemoryError};
pub use registry::{PoolRegistry, PoolSummary};
