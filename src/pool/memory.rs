//! In-process adapter with scriptable failures.
//!
//! Connections are plain serial numbers. Creation can be delayed, made to
//! fail a scripted number of times or at random, and individual connections
//! can be marked invalid. Used by the test suite and the load simulator.

use crate::pool::adapter::ConnectionAdapter;
use crate::retry::is_retryable_error;
use rand::Rng;
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// A simulated connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConnection {
    /// Creation order, starting at 1.
    pub serial: u64,
}

/// Error produced by [`MemoryAdapter`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct MemoryError {
    pub message: String,
}

impl MemoryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Default)]
struct Script {
    create_failures: VecDeque<String>,
    invalid: HashSet<u64>,
    erroring: HashSet<u64>,
    closed: Vec<u64>,
}

#[derive(Debug, Default)]
pub struct MemoryAdapter {
    next_serial: AtomicU64,
    create_attempts: AtomicU64,
    create_latency: Duration,
    validate_latency: Duration,
    failure_rate: f64,
    fail_closes: AtomicBool,
    script: Mutex<Script>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every creation by `latency`.
    pub fn with_create_latency(mut self, latency: Duration) -> Self {
        self.create_latency = latency;
        self
    }

    /// Delay every validation by `latency`.
    pub fn with_validate_latency(mut self, latency: Duration) -> Self {
        self.validate_latency = latency;
        self
    }

    /// Fail creations at random with a transient error, `rate` in `0.0..=1.0`.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Fail the next `count` creations with `message`.
    pub fn fail_next_creates(&self, count: usize, message: &str) {
        let mut script = self.script();
        script
            .create_failures
            .extend(std::iter::repeat_n(message.to_string(), count));
    }

    /// Make validation of connection `serial` return `false`.
    pub fn invalidate(&self, serial: u64) {
        self.script().invalid.insert(serial);
    }

    /// Make validation of connection `serial` return an error.
    pub fn fail_validation_with_error(&self, serial: u64) {
        self.script().erroring.insert(serial);
    }

    /// Make every close report an error (the connection is still recorded).
    pub fn fail_closes(&self, fail: bool) {
        self.fail_closes.store(fail, Ordering::Relaxed);
    }

    /// Connections successfully created so far.
    pub fn created_count(&self) -> u64 {
        self.next_serial.load(Ordering::Relaxed)
    }

    /// Creation attempts, including failed ones.
    pub fn create_attempts(&self) -> u64 {
        self.create_attempts.load(Ordering::Relaxed)
    }

    /// Serials of closed connections, in closing order.
    pub fn closed_serials(&self) -> Vec<u64> {
        self.script().closed.clone()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_create_outcome(&self) -> Result<MemoryConnection, MemoryError> {
        self.create_attempts.fetch_add(1, Ordering::Relaxed);
        if let Some(message) = self.script().create_failures.pop_front() {
            return Err(MemoryError::new(message));
        }
        if self.failure_rate > 0.0 && rand::thread_rng().gen_bool(self.failure_rate) {
            return Err(MemoryError::new("connection refused (simulated)"));
        }
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(MemoryConnection { serial })
    }
}

impl ConnectionAdapter for MemoryAdapter {
    type Connection = MemoryConnection;
    type Error = MemoryError;

    fn create_connection(
        &self,
    ) -> impl Future<Output = Result<MemoryConnection, MemoryError>> + Send {
        let latency = self.create_latency;
        let outcome = self.next_create_outcome();
        async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            outcome
        }
    }

    fn validate_connection(
        &self,
        conn: &MemoryConnection,
    ) -> impl Future<Output = Result<bool, MemoryError>> + Send {
        let latency = self.validate_latency;
        let outcome = {
            let script = self.script();
            if script.erroring.contains(&conn.serial) {
                Err(MemoryError::new("connection reset during validation"))
            } else {
                Ok(!script.invalid.contains(&conn.serial))
            }
        };
        async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            outcome
        }
    }

    fn close_connection(
        &self,
        conn: MemoryConnection,
    ) -> impl Future<Output = Result<(), MemoryError>> + Send {
        self.script().closed.push(conn.serial);
        let outcome = if self.fail_closes.load(Ordering::Relaxed) {
            Err(MemoryError::new("close failed"))
        } else {
            Ok(())
        };
        async move { outcome }
    }

    fn is_retryable(&self, error: &MemoryError) -> bool {
        is_retryable_error(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_serials_increase() {
        let adapter = MemoryAdapter::new();
        let a = adapter.create_connection().await.unwrap();
        let b = adapter.create_connection().await.unwrap();
        assert_eq!(a.serial, 1);
        assert_eq!(b.serial, 2);
        assert_eq!(adapter.created_count(), 2);
    }

    #[tokio::test]
    async fn test_scripted_failures_are_consumed() {
        let adapter = MemoryAdapter::new();
        adapter.fail_next_creates(1, "connection refused");
        let err = adapter.create_connection().await.unwrap_err();
        assert!(adapter.is_retryable(&err));
        assert!(adapter.create_connection().await.is_ok());
        assert_eq!(adapter.create_attempts(), 2);
    }

    #[tokio::test]
    async fn test_validation_script() {
        let adapter = MemoryAdapter::new();
        let conn = adapter.create_connection().await.unwrap();
        assert_eq!(adapter.validate_connection(&conn).await, Ok(true));
        adapter.invalidate(conn.serial);
        assert_eq!(adapter.validate_connection(&conn).await, Ok(false));
    }

    #[tokio::test]
    async fn test_close_records_even_on_error() {
        let adapter = MemoryAdapter::new();
        adapter.fail_closes(true);
        let conn = adapter.create_connection().await.unwrap();
        assert!(adapter.close_connection(conn).await.is_err());
        assert_eq!(adapter.closed_serials(), vec![1]);
    }

    #[test]
    fn test_non_transient_message_is_not_retryable() {
        let adapter = MemoryAdapter::new();
        assert!(!adapter.is_retryable(&MemoryError::new("password authentication failed")));
    }
}
