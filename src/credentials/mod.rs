//! Warehouse credential abstraction.
//!
//! Provides a unified interface for producing the three values a warehouse
//! connection needs (server hostname, HTTP path, access token) from various
//! sources (a pre-issued personal access token, a static OAuth client, or
//! OAuth client details kept in Azure Key Vault).
//!
//! # Configuration
//!
//! Credentials are usually built from a `warehouse.toml` file naming the
//! strategy and its inputs:
//!
//! ```toml
//! auth = "oauth"
//! server_hostname = "adb-1234.5.azuredatabricks.net"
//! http_path = "/sql/1.0/warehouses/abc123"
//! client_id = "..."
//! client_secret = "..."
//! ```

mod config;
mod keyvault;
mod oauth;
mod pat;

pub use config::CredentialConfig;
pub use keyvault::{
    KeyVaultClient, KeyVaultCredentials, SecretLookupError, SecretNames, KEYVAULT_URL_ENV,
};
pub use oauth::{OAuthStaticCredentials, TokenExchange, TOKEN_TIMEOUT};
pub use pat::PatCredentials;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::{Error, Field, Result};

/// Source of the values needed to open a warehouse connection.
///
/// Implementations may read fixed values or perform network round-trips;
/// callers should not assume either. The access token is the only value
/// implementations are expected to memoize.
#[async_trait]
pub trait WarehouseCredentials: Send + Sync {
    /// Hostname of the warehouse workspace, without scheme.
    async fn server_hostname(&self) -> Result<String>;

    /// HTTP path of the SQL warehouse (e.g. `/sql/1.0/warehouses/abc123`).
    async fn http_path(&self) -> Result<String>;

    async fn access_token(&self) -> Result<SecretString>;
}

/// Credentials that authenticate as an OAuth client (service principal).
///
/// Implementors get their access token from [`TokenExchange`], which runs the
/// client-credentials grant against `https://{server_hostname}/oidc/v1/token`.
#[async_trait]
pub trait OAuthIdentity: WarehouseCredentials {
    async fn client_id(&self) -> Result<String>;

    async fn client_secret(&self) -> Result<SecretString>;
}

/// Return the value of a statically supplied field, treating absent and empty
/// values alike.
pub(crate) fn require(field: Field, value: Option<&str>) -> Result<String> {
    match value {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(Error::Resolution { field }),
    }
}

pub(crate) fn require_secret(field: Field, value: Option<&SecretString>) -> Result<SecretString> {
    use secrecy::ExposeSecret;

    match value {
        Some(v) if !v.expose_secret().is_empty() => Ok(v.clone()),
        _ => Err(Error::Resolution { field }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_rejects_absent_and_empty() {
        assert!(matches!(
            require(Field::HttpPath, None),
            Err(Error::Resolution {
                field: Field::HttpPath
            })
        ));
        assert!(matches!(
            require(Field::ServerHostname, Some("")),
            Err(Error::Resolution {
                field: Field::ServerHostname
            })
        ));
        assert_eq!(
            require(Field::ServerHostname, Some("h")).unwrap(),
            "h".to_string()
        );
    }
}
