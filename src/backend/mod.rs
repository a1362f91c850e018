//! Connection backends.
//!
//! A backend turns resolved credentials into a live connection. The rest of
//! the crate only relies on the two traits below, so any SQL transport can
//! be plugged in. [`StatementApiBackend`] is the built-in implementation.

mod statement;

pub use statement::{StatementApiBackend, StatementApiConnection, StatementError};

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::BackendError;

/// One result row; `None` is SQL `NULL`.
pub type Row = Vec<Option<String>>;

/// Resolved values a backend needs to open a connection.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub server_hostname: String,
    pub http_path: String,
    pub access_token: SecretString,
}

#[async_trait]
pub trait ConnectionBackend: Send + Sync {
    type Connection: WarehouseConnection;

    async fn open(&self, params: ConnectParams) -> Result<Self::Connection, BackendError>;
}

#[async_trait]
pub trait WarehouseConnection: Send {
    async fn execute(&mut self, sql: &str) -> Result<Vec<Row>, BackendError>;

    /// Release the connection. Called exactly once by [`crate::ScopedConnection`].
    fn close(&mut self) -> Result<(), BackendError>;
}
