//! The strategy a database binding implements to plug into [`Pool`](super::Pool).

use std::future::Future;

/// Connection lifecycle operations supplied by a concrete driver binding.
///
/// The pool calls these and only these; it never inspects a connection.
///
/// ```ignore
/// impl ConnectionAdapter for PgAdapter {
///     type Connection = PgConnection;
///     type Error = sqlx::Error;
///
///     async fn create_connection(&self) -> Result<PgConnection, sqlx::Error> {
///         PgConnection::connect(&self.url).await
///     }
///
///     async fn validate_connection(&self, conn: &PgConnection) -> Result<bool, sqlx::Error> {
///         Ok(!conn.is_closed())
///     }
///
///     async fn close_connection(&self, conn: PgConnection) -> Result<(), sqlx::Error> {
///         conn.close().await
///     }
/// }
/// ```
pub trait ConnectionAdapter: Send + Sync + 'static {
    type Connection: Send + Sync + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a new connection. Failures are retried by the pool.
    fn create_connection(
        &self,
    ) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;

    /// Check an idle connection before it is handed out again.
    ///
    /// `Ok(false)` and `Err(_)` both cause the connection to be discarded.
    fn validate_connection(
        &self,
        conn: &Self::Connection,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    /// Tear a connection down. Errors are logged and otherwise ignored.
    fn close_connection(
        &self,
        conn: Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Whether a creation error is worth another attempt.
    fn is_retryable(&self, _error: &Self::Error) -> bool {
        true
    }
}
