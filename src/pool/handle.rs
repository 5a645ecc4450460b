//! Connection handles checked out of a pool.

use serde::Serialize;

/// Pool-assigned identity of a connection. Never reused within a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ConnectionId(pub(crate) u64);

impl ConnectionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connection owned by exactly one caller until it is handed back with
/// [`Pool::release`](super::Pool::release).
///
/// Dropping it without releasing leaves the slot counted as active.
#[must_use = "release the connection back to its pool"]
pub struct PooledConnection<C> {
    id: ConnectionId,
    conn: C,
}

impl<C> PooledConnection<C> {
    pub(crate) fn new(id: ConnectionId, conn: C) -> Self {
        Self { id, conn }
    }

    /// Identity of this connection within its pool.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) fn into_inner(self) -> C {
        self.conn
    }
}

impl<C> std::ops::Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<C> std::ops::DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl<C: std::fmt::Debug> std::fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("conn", &self.conn)
            .finish()
    }
}
