//! Bounded connection pool.
//!
//! # Design Decisions
//!
//! - **One `std::sync::Mutex` for all bookkeeping**: idle list, active set,
//!   waiter queue and counters change together, and the lock is never held
//!   across an await point
//! - **LIFO idle reuse**: the most recently released connection is the
//!   warmest and the most likely to pass validation
//! - **FIFO waiters with direct hand-off**: a release gives the connection
//!   straight to the oldest waiter; it never round-trips through the idle list
//! - **Explicit timers**: each idle entry owns its eviction task and aborts it
//!   when claimed; each waiter owns its acquire timeout
//!
//! # Capacity
//!
//! Connections being created or validated count as `pending` and take a slot,
//! so `active + idle + pending <= max` holds at every point. A slot given back
//! without producing a connection (failed creation, cancelled acquire) wakes
//! the oldest waiter, which runs the acquire loop again from the head of the
//! queue.
//!
//! # Cancellation Safety
//!
//! A dropped `acquire()` future gives back whatever it held: a pending slot is
//! released, a connection under validation is destroyed, and a connection or
//! wake-up handed to a waiter that stopped listening goes to the next waiter.

use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};
use crate::models::{HealthReport, PoolStats};
use crate::pool::adapter::ConnectionAdapter;
use crate::pool::handle::{ConnectionId, PooledConnection};
use crate::retry::{RetryConfig, with_retry_if};
use futures_util::future::join_all;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Base delay between connection creation attempts.
const CREATE_BASE_DELAY_MS: u64 = 100;

/// What a queued waiter receives.
enum Handoff<C> {
    /// A released connection, already counted as active for the receiver.
    Connection(PooledConnection<C>),
    /// A slot was freed without a connection; run the acquire loop again.
    Retry,
    /// The pool is closing.
    Closed,
}

struct IdleEntry<C> {
    conn: PooledConnection<C>,
    idle_since: Instant,
    /// Identifies this stay in the idle list for its eviction timer.
    token: u64,
    eviction: Option<JoinHandle<()>>,
}

impl<C> IdleEntry<C> {
    /// Take the connection out of the idle list, cancelling its eviction.
    fn claim(mut self) -> PooledConnection<C> {
        if let Some(handle) = self.eviction.take() {
            handle.abort();
        }
        self.conn
    }
}

struct Waiter<C> {
    id: u64,
    tx: oneshot::Sender<Handoff<C>>,
}

struct PoolState<C> {
    /// Most recently released at the end.
    idle: Vec<IdleEntry<C>>,
    active: HashSet<ConnectionId>,
    waiters: VecDeque<Waiter<C>>,
    pending: usize,
    created: u64,
    closed_count: u64,
    closed: bool,
    next_waiter_id: u64,
    next_idle_token: u64,
}

impl<C> PoolState<C> {
    fn new(max: usize) -> Self {
        Self {
            idle: Vec::with_capacity(max),
            active: HashSet::with_capacity(max),
            waiters: VecDeque::new(),
            pending: 0,
            created: 0,
            closed_count: 0,
            closed: false,
            next_waiter_id: 0,
            next_idle_token: 0,
        }
    }

    fn occupied(&self) -> usize {
        self.active.len() + self.idle.len() + self.pending
    }

    fn stats(&self) -> PoolStats {
        let active = self.active.len();
        let idle = self.idle.len();
        PoolStats {
            active,
            idle,
            total: active + idle,
            waiting: self.waiters.iter().filter(|w| !w.tx.is_closed()).count(),
            pending: self.pending,
            created: self.created,
            closed: self.closed_count,
        }
    }

    /// Wake the oldest live waiter so it retries with the slot just freed.
    fn wake_waiter(&mut self) {
        if self.closed {
            return;
        }
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.tx.send(Handoff::Retry).is_ok() {
                debug!(waiter_id = waiter.id, "Slot freed, waking waiter");
                return;
            }
        }
    }
}

struct PoolInner<A: ConnectionAdapter> {
    adapter: A,
    config: PoolConfig,
    state: Mutex<PoolState<A::Connection>>,
    next_id: AtomicU64,
}

impl<A: ConnectionAdapter> PoolInner<A> {
    fn lock(&self) -> MutexGuard<'_, PoolState<A::Connection>> {
        // State is only mutated in short critical sections without user code
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Close a connection, ignoring errors.
    async fn destroy(&self, conn: PooledConnection<A::Connection>) {
        let id = conn.id();
        if let Err(e) = self.adapter.close_connection(conn.into_inner()).await {
            debug!(connection_id = %id, error = %e, "Error while closing connection (ignored)");
        }
    }

    /// Remove the idle entry `token` once its timeout fires.
    async fn evict(&self, token: u64) {
        let conn = {
            let mut state = self.lock();
            let Some(pos) = state.idle.iter().position(|entry| entry.token == token) else {
                // Claimed by an acquire in the meantime
                return;
            };
            let entry = state.idle.remove(pos);
            state.closed_count += 1;
            debug!(
                connection_id = %entry.conn.id(),
                idle_ms = entry.idle_since.elapsed().as_millis() as u64,
                "Evicting idle connection"
            );
            // Detach rather than abort: this task is the eviction timer
            entry.conn
        };
        self.destroy(conn).await;
    }
}

/// A slot reserved for a connection being created or validated.
///
/// Dropping it without [`activate`](Self::activate) frees the slot and wakes
/// the oldest waiter.
struct Reservation<'a, A: ConnectionAdapter> {
    inner: &'a PoolInner<A>,
    armed: bool,
}

impl<'a, A: ConnectionAdapter> Reservation<'a, A> {
    /// Must be created right after `pending` was incremented under the lock.
    fn new(inner: &'a PoolInner<A>) -> Self {
        Self { inner, armed: true }
    }

    fn activate(mut self, state: &mut PoolState<A::Connection>, id: ConnectionId) {
        self.armed = false;
        state.pending -= 1;
        state.active.insert(id);
    }

    /// Free the slot for the caller's own next loop iteration.
    fn cancel(mut self, state: &mut PoolState<A::Connection>) {
        self.armed = false;
        state.pending -= 1;
    }
}

impl<A: ConnectionAdapter> Drop for Reservation<'_, A> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.inner.lock();
            state.pending -= 1;
            state.wake_waiter();
        }
    }
}

/// An idle connection taken out for validation.
///
/// Destroyed if dropped before [`take`](Self::take), e.g. when the acquire is
/// cancelled mid-validation.
struct Claimed<'a, A: ConnectionAdapter> {
    pool: &'a Pool<A>,
    conn: Option<PooledConnection<A::Connection>>,
}

impl<A: ConnectionAdapter> Claimed<'_, A> {
    fn take(mut self) -> Option<PooledConnection<A::Connection>> {
        self.conn.take()
    }
}

impl<A: ConnectionAdapter> Drop for Claimed<'_, A> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.inner.lock().closed_count += 1;
            debug!(connection_id = %conn.id(), "Acquire dropped during validation, destroying connection");
            self.pool.spawn_destroy(conn);
        }
    }
}

enum Step<'a, A: ConnectionAdapter> {
    Validate(PooledConnection<A::Connection>, Reservation<'a, A>),
    Create(Reservation<'a, A>),
    Wait(u64, oneshot::Receiver<Handoff<A::Connection>>),
}

/// A generic, bounded pool of connections produced by a [`ConnectionAdapter`].
pub struct Pool<A: ConnectionAdapter> {
    inner: Arc<PoolInner<A>>,
}

impl<A: ConnectionAdapter> Clone for Pool<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: ConnectionAdapter> std::fmt::Debug for Pool<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl<A: ConnectionAdapter> Pool<A> {
    /// Create a pool. No connection is opened until the first `acquire()`.
    pub fn new(adapter: A, config: PoolConfig) -> PoolResult<Self> {
        config.validate()?;
        debug!(
            min = config.min,
            max = config.max,
            idle_timeout_ms = config.idle_timeout.as_millis() as u64,
            acquire_timeout_ms = config.acquire_timeout.as_millis() as u64,
            "Created connection pool"
        );
        let max = config.max;
        Ok(Self {
            inner: Arc::new(PoolInner {
                adapter,
                config,
                state: Mutex::new(PoolState::new(max)),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    /// The configuration this pool was built with.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// The adapter this pool delegates connection lifecycle to.
    pub fn adapter(&self) -> &A {
        &self.inner.adapter
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Check out a connection.
    ///
    /// Reuses the most recently released idle connection if it validates,
    /// creates a new one while under `max`, and otherwise waits up to
    /// `acquire_timeout` for a release.
    pub async fn acquire(&self) -> PoolResult<PooledConnection<A::Connection>> {
        let start = Instant::now();
        let result = self.acquire_inner().await;
        let wait_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(conn) => debug!(connection_id = %conn.id(), wait_ms, "Acquired connection"),
            Err(e) => warn!(wait_ms, error = %e, "Failed to acquire connection"),
        }
        result
    }

    async fn acquire_inner(&self) -> PoolResult<PooledConnection<A::Connection>> {
        // Set on first wait; a woken waiter keeps its original deadline
        let mut deadline: Option<Instant> = None;
        let mut resumed = false;

        loop {
            let step = {
                let mut state = self.inner.lock();
                if state.closed {
                    return Err(PoolError::connection("Pool is closed"));
                }
                if let Some(entry) = state.idle.pop() {
                    state.pending += 1;
                    Step::Validate(entry.claim(), Reservation::new(&self.inner))
                } else if state.occupied() < self.inner.config.max {
                    state.pending += 1;
                    Step::Create(Reservation::new(&self.inner))
                } else {
                    let id = state.next_waiter_id;
                    state.next_waiter_id += 1;
                    let (tx, rx) = oneshot::channel();
                    let waiter = Waiter { id, tx };
                    if resumed {
                        state.waiters.push_front(waiter);
                    } else {
                        state.waiters.push_back(waiter);
                    }
                    debug!(
                        waiter_id = id,
                        waiting = state.waiters.len(),
                        "Pool exhausted, waiting for a release"
                    );
                    Step::Wait(id, rx)
                }
            };

            match step {
                Step::Validate(conn, reservation) => {
                    if let Some(conn) = self.validate_idle(conn, reservation).await {
                        return Ok(conn);
                    }
                }
                Step::Create(reservation) => return self.create(reservation).await,
                Step::Wait(id, rx) => {
                    let deadline = *deadline
                        .get_or_insert_with(|| Instant::now() + self.inner.config.acquire_timeout);
                    match self.wait(id, rx, deadline).await? {
                        Some(conn) => return Ok(conn),
                        None => resumed = true,
                    }
                }
            }
        }
    }

    /// Validate a connection taken from the idle list.
    ///
    /// Returns `None` after destroying a connection that failed validation.
    async fn validate_idle(
        &self,
        conn: PooledConnection<A::Connection>,
        reservation: Reservation<'_, A>,
    ) -> Option<PooledConnection<A::Connection>> {
        let id = conn.id();
        let claimed = Claimed {
            pool: self,
            conn: Some(conn),
        };
        let valid = match &claimed.conn {
            Some(conn) => match self.inner.adapter.validate_connection(conn).await {
                Ok(valid) => valid,
                Err(e) => {
                    debug!(connection_id = %id, error = %e, "Validation raised an error");
                    false
                }
            },
            None => false,
        };
        let conn = claimed.take()?;

        {
            let mut state = self.inner.lock();
            if valid && !state.closed {
                reservation.activate(&mut state, id);
                return Some(conn);
            }
            reservation.cancel(&mut state);
            state.closed_count += 1;
        }

        debug!(connection_id = %id, "Discarding connection that failed validation");
        self.inner.destroy(conn).await;
        None
    }

    /// Create a connection in a reserved slot, retrying transient failures.
    async fn create(
        &self,
        reservation: Reservation<'_, A>,
    ) -> PoolResult<PooledConnection<A::Connection>> {
        let attempts = self.inner.config.acquire_retries.max(1);
        let retry = RetryConfig::new(attempts)
            .base_delay(Duration::from_millis(CREATE_BASE_DELAY_MS));
        let adapter = &self.inner.adapter;

        let created = with_retry_if(
            &retry,
            |e: &A::Error| adapter.is_retryable(e),
            || adapter.create_connection(),
        )
        .await;

        let conn = match created {
            Ok(conn) => conn,
            Err(e) => {
                // Frees the slot for the oldest waiter
                drop(reservation);
                return Err(PoolError::connection_with(
                    format!("Failed to create connection after {attempts} attempt(s): {e}"),
                    e,
                ));
            }
        };

        let id = ConnectionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let conn = PooledConnection::new(id, conn);

        {
            let mut state = self.inner.lock();
            state.created += 1;
            if !state.closed {
                reservation.activate(&mut state, id);
                info!(connection_id = %id, total = state.occupied(), "Created new connection");
                return Ok(conn);
            }
            reservation.cancel(&mut state);
            state.closed_count += 1;
        }

        // The pool closed while this connection was being opened
        self.inner.destroy(conn).await;
        Err(PoolError::closing())
    }

    /// Wait for a release to hand a connection over.
    ///
    /// `Ok(None)` means a slot was freed and the caller should loop again.
    async fn wait(
        &self,
        id: u64,
        rx: oneshot::Receiver<Handoff<A::Connection>>,
        deadline: Instant,
    ) -> PoolResult<Option<PooledConnection<A::Connection>>> {
        let timeout = self.inner.config.acquire_timeout;
        let mut waiting = WaitGuard {
            pool: self,
            id,
            rx,
            done: false,
        };

        let handoff = match tokio::time::timeout_at(deadline, &mut waiting.rx).await {
            Ok(received) => {
                waiting.done = true;
                received.unwrap_or(Handoff::Closed)
            }
            Err(_) => {
                waiting.done = true;
                let mut state = self.inner.lock();
                if let Some(pos) = state.waiters.iter().position(|w| w.id == id) {
                    state.waiters.remove(pos);
                    return Err(PoolError::timeout(timeout));
                }
                drop(state);
                // Resolved between the timer firing and taking the lock
                match waiting.rx.try_recv() {
                    Ok(Handoff::Retry) => {
                        self.inner.lock().wake_waiter();
                        return Err(PoolError::timeout(timeout));
                    }
                    Ok(handoff) => handoff,
                    Err(_) => Handoff::Closed,
                }
            }
        };

        match handoff {
            Handoff::Connection(conn) => Ok(Some(conn)),
            Handoff::Retry => Ok(None),
            Handoff::Closed => Err(PoolError::closing()),
        }
    }

    /// Hand a connection back.
    ///
    /// Ignored if the connection is not currently active in this pool. Goes
    /// to the oldest waiter if there is one, else to the idle list, else
    /// (pool closed or over capacity) it is destroyed. Never suspends.
    pub fn release(&self, conn: PooledConnection<A::Connection>) {
        let id = conn.id();
        let mut state = self.inner.lock();
        if !state.active.remove(&id) {
            debug!(connection_id = %id, "Ignoring release of a connection that is not active");
            return;
        }

        let mut conn = conn;
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.tx.send(Handoff::Connection(conn)) {
                Ok(()) => {
                    state.active.insert(id);
                    debug!(
                        connection_id = %id,
                        waiter_id = waiter.id,
                        "Handed connection to waiter"
                    );
                    return;
                }
                // That waiter stopped listening, try the next one
                Err(Handoff::Connection(returned)) => conn = returned,
                Err(_) => return,
            }
        }

        if !state.closed && state.occupied() < self.inner.config.max {
            let token = state.next_idle_token;
            state.next_idle_token += 1;
            let eviction = self.schedule_eviction(token);
            state.idle.push(IdleEntry {
                conn,
                idle_since: Instant::now(),
                token,
                eviction,
            });
            return;
        }

        state.closed_count += 1;
        drop(state);
        debug!(connection_id = %id, "Destroying released connection");
        self.spawn_destroy(conn);
    }

    fn schedule_eviction(&self, token: u64) -> Option<JoinHandle<()>> {
        let idle_timeout = self.inner.config.idle_timeout;
        if idle_timeout.is_zero() {
            return None;
        }
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let weak: Weak<PoolInner<A>> = Arc::downgrade(&self.inner);
        Some(runtime.spawn(async move {
            tokio::time::sleep(idle_timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.evict(token).await;
            }
        }))
    }

    fn spawn_destroy(&self, conn: PooledConnection<A::Connection>) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let inner = Arc::clone(&self.inner);
                runtime.spawn(async move { inner.destroy(conn).await });
            }
            Err(_) => {
                warn!(connection_id = %conn.id(), "No runtime available, dropping connection");
            }
        }
    }

    /// Close the pool.
    ///
    /// Fails every waiter with a connection error and destroys all idle
    /// connections. Active connections are destroyed when they are released.
    pub async fn close(&self) {
        let (waiters, idle) = {
            let mut state = self.inner.lock();
            state.closed = true;
            let waiters = std::mem::take(&mut state.waiters);
            let idle = std::mem::take(&mut state.idle);
            state.closed_count += idle.len() as u64;
            (waiters, idle)
        };

        info!(
            waiters = waiters.len(),
            idle = idle.len(),
            "Closing connection pool"
        );

        for waiter in waiters {
            let _ = waiter.tx.send(Handoff::Closed);
        }

        let conns: Vec<_> = idle.into_iter().map(IdleEntry::claim).collect();
        join_all(conns.into_iter().map(|conn| self.inner.destroy(conn))).await;
    }

    /// Snapshot of the pool's counters.
    pub fn stats(&self) -> PoolStats {
        self.inner.lock().stats()
    }

    /// Acquire, validate and release a connection, timing the round trip.
    pub async fn health_check(&self) -> HealthReport {
        let start = Instant::now();
        let outcome = match self.acquire().await {
            Ok(conn) => {
                let valid = self.inner.adapter.validate_connection(&conn).await;
                self.release(conn);
                match valid {
                    Ok(true) => Ok(()),
                    Ok(false) => Err("Connection failed validation".to_string()),
                    Err(e) => Err(e.to_string()),
                }
            }
            Err(e) => Err(e.to_string()),
        };

        let latency = start.elapsed();
        match outcome {
            Ok(()) => HealthReport {
                healthy: true,
                latency,
                error: None,
            },
            Err(error) => {
                warn!(error = %error, "Pool health check failed");
                HealthReport {
                    healthy: false,
                    latency,
                    error: Some(error),
                }
            }
        }
    }
}

/// Removes a waiter whose `acquire()` was dropped mid-wait.
struct WaitGuard<'a, A: ConnectionAdapter> {
    pool: &'a Pool<A>,
    id: u64,
    rx: oneshot::Receiver<Handoff<A::Connection>>,
    done: bool,
}

impl<A: ConnectionAdapter> Drop for WaitGuard<'_, A> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let removed = {
            let mut state = self.pool.inner.lock();
            match state.waiters.iter().position(|w| w.id == self.id) {
                Some(pos) => state.waiters.remove(pos).is_some(),
                None => false,
            }
        };
        if removed {
            return;
        }
        // Something was already handed to us; pass it on
        match self.rx.try_recv() {
            Ok(Handoff::Connection(conn)) => self.pool.release(conn),
            Ok(Handoff::Retry) => self.pool.inner.lock().wake_waiter(),
            Ok(Handoff::Closed) | Err(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::memory::MemoryAdapter;
    use tokio_test::{assert_pending, assert_ready, task};

    fn test_config() -> PoolConfig {
        PoolConfig::default()
            .min(0)
            .max(2)
            .idle_timeout(Duration::from_secs(1))
            .acquire_timeout(Duration::from_millis(500))
            .acquire_retries(2)
    }

    fn test_pool(config: PoolConfig) -> Pool<MemoryAdapter> {
        Pool::new(MemoryAdapter::new(), config).unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let err = Pool::new(MemoryAdapter::new(), PoolConfig::default().max(0)).unwrap_err();
        assert!(matches!(err, PoolError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_acquire_creates_then_reuses_lifo() {
        let pool = test_pool(test_config());
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        let (a_id, b_id) = (a.id(), b.id());
        assert_ne!(a_id, b_id);

        pool.release(a);
        pool.release(b);
        assert_eq!(pool.stats().idle, 2);

        // Most recently released first
        let again = pool.acquire().await.unwrap();
        assert_eq!(again.id(), b_id);
        assert_eq!(pool.adapter().created_count(), 2);
        pool.release(again);
    }

    #[tokio::test]
    async fn test_double_release_is_noop() {
        let pool = test_pool(test_config());
        let conn = pool.acquire().await.unwrap();
        let id = conn.id();
        let serial = conn.serial;
        pool.release(conn);
        let before = pool.stats();

        // A stale handle with the same identity
        pool.release(PooledConnection::new(id, crate::pool::memory::MemoryConnection { serial }));
        assert_eq!(pool.stats(), before);
        assert_eq!(before.idle, 1);
        assert_eq!(before.active, 0);
    }

    #[tokio::test]
    async fn test_foreign_handle_is_ignored() {
        let pool = test_pool(test_config());
        pool.release(PooledConnection::new(
            ConnectionId(99),
            crate::pool::memory::MemoryConnection { serial: 99 },
        ));
        let stats = pool.stats();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.closed, 0);
    }

    #[tokio::test]
    async fn test_waiter_is_pending_until_release() {
        let pool = test_pool(test_config().max(1));
        let held = pool.acquire().await.unwrap();
        let held_id = held.id();

        let mut waiter = task::spawn(pool.acquire());
        assert_pending!(waiter.poll());
        assert_eq!(pool.stats().waiting, 1);

        pool.release(held);
        assert!(waiter.is_woken());
        let conn = assert_ready!(waiter.poll()).unwrap();
        assert_eq!(conn.id(), held_id);
        assert_eq!(pool.stats().active, 1);
        assert_eq!(pool.stats().waiting, 0);
        pool.release(conn);
    }

    #[tokio::test]
    async fn test_dropped_waiter_leaves_queue() {
        let pool = test_pool(test_config().max(1));
        let held = pool.acquire().await.unwrap();

        let mut waiter = task::spawn(pool.acquire());
        assert_pending!(waiter.poll());
        drop(waiter);
        assert_eq!(pool.stats().waiting, 0);

        pool.release(held);
        let stats = pool.stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.active, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_connection_is_evicted() {
        let pool = test_pool(test_config());
        let conn = pool.acquire().await.unwrap();
        let serial = conn.serial;
        pool.release(conn);
        assert_eq!(pool.stats().idle, 1);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let stats = pool.stats();
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.closed, 1);
        assert_eq!(pool.adapter().closed_serials(), vec![serial]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_claimed_connection_is_not_evicted() {
        let pool = test_pool(test_config());
        let conn = pool.acquire().await.unwrap();
        pool.release(conn);

        tokio::time::sleep(Duration::from_millis(900)).await;
        let conn = pool.acquire().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(pool.stats().active, 1);
        assert_eq!(pool.stats().closed, 0);
        assert!(pool.adapter().closed_serials().is_empty());
        pool.release(conn);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_idle_timeout_keeps_connection() {
        let pool = test_pool(test_config().idle_timeout(Duration::ZERO));
        let conn = pool.acquire().await.unwrap();
        pool.release(conn);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(pool.stats().idle, 1);
    }

    #[tokio::test]
    async fn test_validation_error_replaces_connection() {
        let pool = test_pool(test_config());
        let conn = pool.acquire().await.unwrap();
        let serial = conn.serial;
        pool.release(conn);

        pool.adapter().fail_validation_with_error(serial);
        let fresh = pool.acquire().await.unwrap();
        assert_ne!(fresh.serial, serial);
        assert_eq!(pool.stats().closed, 1);
        assert_eq!(pool.adapter().closed_serials(), vec![serial]);
        pool.release(fresh);
    }

    #[tokio::test]
    async fn test_release_after_close_destroys() {
        let pool = test_pool(test_config());
        let conn = pool.acquire().await.unwrap();
        pool.close().await;

        pool.release(conn);
        tokio::task::yield_now().await;
        let stats = pool.stats();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.closed, 1);
    }

    #[tokio::test]
    async fn test_health_check_reports_healthy() {
        let pool = test_pool(test_config());
        let report = pool.health_check().await;
        assert!(report.healthy);
        assert!(report.error.is_none());
        let stats = pool.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.idle, 1);
    }

    #[tokio::test]
    async fn test_health_check_on_closed_pool() {
        let pool = test_pool(test_config());
        pool.close().await;
        let report = pool.health_check().await;
        assert!(!report.healthy);
        assert!(report.error.unwrap().contains("Pool is closed"));
        assert_eq!(pool.adapter().created_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_freed_slot_skips_cancelled_waiter() {
        let adapter = MemoryAdapter::new().with_create_latency(Duration::from_millis(100));
        adapter.fail_next_creates(1, "password authentication failed");
        let pool = Pool::new(adapter, test_config().max(1)).unwrap();

        let mut creating = task::spawn(pool.acquire());
        assert_pending!(creating.poll());
        let mut first = task::spawn(pool.acquire());
        let mut second = task::spawn(pool.acquire());
        assert_pending!(first.poll());
        assert_pending!(second.poll());

        tokio::time::sleep(Duration::from_millis(110)).await;
        assert!(assert_ready!(creating.poll()).is_err());

        // `first` was woken but is gone; the wake-up moves on to `second`
        drop(first);
        assert_pending!(second.poll());
        assert_eq!(pool.stats().pending, 1);

        tokio::time::sleep(Duration::from_millis(110)).await;
        let conn = assert_ready!(second.poll()).unwrap();
        assert_eq!(pool.stats().active, 1);
        pool.release(conn);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_dropped_during_validation_destroys_connection() {
        let adapter = MemoryAdapter::new().with_validate_latency(Duration::from_millis(100));
        let pool = Pool::new(adapter, test_config()).unwrap();
        let conn = pool.acquire().await.unwrap();
        let serial = conn.serial;
        pool.release(conn);

        let mut validating = task::spawn(pool.acquire());
        assert_pending!(validating.poll());
        assert_eq!(pool.stats().pending, 1);
        drop(validating);
        tokio::task::yield_now().await;

        let stats = pool.stats();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.closed, 1);
        assert_eq!(pool.adapter().closed_serials(), vec![serial]);
    }

    #[tokio::test]
    async fn test_stale_eviction_token_is_ignored() {
        let pool = test_pool(test_config());
        let conn = pool.acquire().await.unwrap();
        pool.release(conn);
        let first_token = pool.inner.lock().idle[0].token;

        // Claimed and released again under the same connection id
        let conn = pool.acquire().await.unwrap();
        pool.release(conn);
        let second_token = pool.inner.lock().idle[0].token;
        assert_ne!(first_token, second_token);

        pool.inner.evict(first_token).await;
        assert_eq!(pool.stats().idle, 1);
        assert_eq!(pool.stats().closed, 0);

        pool.inner.evict(second_token).await;
        assert_eq!(pool.stats().idle, 0);
        assert_eq!(pool.stats().closed, 1);
    }
}
