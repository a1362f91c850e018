//! Credential resolution and authenticated connections for SQL warehouses.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use warehouse::{OAuthStaticCredentials, StatementApiBackend, WarehouseClient};
//!
//! # async fn demo() -> warehouse::Result<()> {
//! let credentials = OAuthStaticCredentials::new(
//!     "adb-1234.5.azuredatabricks.net",
//!     "/sql/1.0/warehouses/abc123",
//!     "client-id",
//!     "client-secret",
//! );
//! let client = WarehouseClient::new(Arc::new(credentials), StatementApiBackend::new());
//!
//! let mut conn = client.connection().await?;
//! let rows = conn.execute("SELECT current_user()").await?;
//! conn.close()?;
//! # let _ = rows;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod client;
pub mod credentials;
pub mod error;
pub mod identity;

pub use backend::{ConnectParams, ConnectionBackend, Row, StatementApiBackend, WarehouseConnection};
pub use client::{open_connection, ScopedConnection, WarehouseClient};
pub use credentials::{
    CredentialConfig, KeyVaultCredentials, OAuthIdentity, OAuthStaticCredentials, PatCredentials,
    SecretNames, TokenExchange, WarehouseCredentials,
};
pub use error::{Error, Field, Result};
