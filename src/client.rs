//! Connection factory.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::backend::{ConnectParams, ConnectionBackend, Row, WarehouseConnection};
use crate::credentials::WarehouseCredentials;
use crate::error::{Error, Result};

/// Resolve hostname, path and token from `credentials` and open a connection.
///
/// Lazy credential variants do their secret lookups and token exchange here.
/// Nothing is retried.
pub async fn open_connection<B>(
    credentials: &dyn WarehouseCredentials,
    backend: &B,
) -> Result<ScopedConnection<B::Connection>>
where
    B: ConnectionBackend + ?Sized,
{
    let server_hostname = credentials.server_hostname().await?;
    let http_path = credentials.http_path().await?;
    let access_token = credentials.access_token().await?;

    tracing::debug!(
        server_hostname = %server_hostname,
        http_path = %http_path,
        "Opening warehouse connection"
    );

    let connection = backend
        .open(ConnectParams {
            server_hostname: server_hostname.clone(),
            http_path,
            access_token,
        })
        .await
        .map_err(|source| Error::Connection {
            hostname: server_hostname,
            source,
        })?;

    Ok(ScopedConnection::new(connection))
}

/// A connection that is closed exactly once.
///
/// Call [`ScopedConnection::close`] to observe close errors; otherwise the
/// connection is closed on drop and a failure is only logged.
pub struct ScopedConnection<C: WarehouseConnection> {
    inner: Option<C>,
}

impl<C: WarehouseConnection> ScopedConnection<C> {
    pub fn new(connection: C) -> Self {
        Self {
            inner: Some(connection),
        }
    }

    pub async fn execute(&mut self, sql: &str) -> Result<Vec<Row>> {
        match self.inner.as_mut() {
            Some(conn) => conn.execute(sql).await.map_err(Error::Query),
            None => Err(Error::Query("connection already closed".into())),
        }
    }

    /// The backend connection, for backend-specific operations.
    pub fn get_mut(&mut self) -> Option<&mut C> {
        self.inner.as_mut()
    }

    pub fn close(mut self) -> Result<()> {
        match self.inner.take() {
            Some(mut conn) => conn.close().map_err(Error::Close),
            None => Ok(()),
        }
    }
}

impl<C: WarehouseConnection> Drop for ScopedConnection<C> {
    fn drop(&mut self) {
        if let Some(mut conn) = self.inner.take() {
            if let Err(err) = conn.close() {
                tracing::warn!(error = %err, "Failed to close warehouse connection");
            }
        }
    }
}

/// Future returned by the closure given to [`WarehouseClient::with_connection`].
pub type ConnectionFuture<'c, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'c>>;

/// Opens connections for one set of credentials.
pub struct WarehouseClient<B> {
    credentials: Arc<dyn WarehouseCredentials>,
    backend: B,
}

impl<B: ConnectionBackend> WarehouseClient<B> {
    pub fn new(credentials: Arc<dyn WarehouseCredentials>, backend: B) -> Self {
        Self {
            credentials,
            backend,
        }
    }

    pub fn credentials(&self) -> &dyn WarehouseCredentials {
        self.credentials.as_ref()
    }

    pub async fn connection(&self) -> Result<ScopedConnection<B::Connection>> {
        open_connection(self.credentials.as_ref(), &self.backend).await
    }

    /// Run `f` with an open connection, then close it.
    ///
    /// The connection is closed whether `f` succeeds or fails. An error from
    /// `f` takes precedence over an error from closing.
    ///
    /// ```no_run
    /// # async fn demo(client: warehouse::WarehouseClient<warehouse::StatementApiBackend>) -> warehouse::Result<()> {
    /// let _rows = client
    ///     .with_connection(|conn| Box::pin(async move { conn.execute("SELECT 1").await }))
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut ScopedConnection<B::Connection>) -> ConnectionFuture<'c, T>,
    {
        let mut conn = self.connection().await?;
        let result = f(&mut conn).await;
        let closed = conn.close();

        match (result, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(close_err)) => {
                tracing::warn!(error = %close_err, "Failed to close warehouse connection");
                Err(err)
            }
        }
    }
}
