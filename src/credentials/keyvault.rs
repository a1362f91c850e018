//! Azure Key Vault backed OAuth credentials.
//!
//! All four connection inputs (client id, client secret, server hostname and
//! HTTP path) live in Key Vault as named secrets. Every field read is one
//! secret lookup; only the access token obtained from them is memoized.

use std::sync::{Arc, OnceLock};

use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::OnceCell;

use super::{OAuthIdentity, TokenExchange, WarehouseCredentials};
use crate::error::{BackendError, Error, Result};
use crate::identity::{DefaultIdentityChain, IdentityProvider, KEYVAULT_SCOPE};

/// Environment variable consulted when no vault URL is passed explicitly.
pub const KEYVAULT_URL_ENV: &str = "AZURE_KEYVAULT_URL";

const API_VERSION: &str = "7.4";

/// Names of the secrets holding each credential field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretNames {
    pub client_id: String,
    pub client_secret: String,
    pub server_hostname: String,
    pub http_path: String,
}

impl Default for SecretNames {
    fn default() -> Self {
        Self {
            client_id: "databricks-sql-warehouse-client-id".to_string(),
            client_secret: "databricks-sql-warehouse-server-client-secret".to_string(),
            server_hostname: "databricks-sql-warehouse-server-hostname".to_string(),
            http_path: "databricks-sql-warehouse-http-path".to_string(),
        }
    }
}

/// Non-success answer from Key Vault for a secret read.
#[derive(Debug, thiserror::Error)]
#[error("key vault returned {status}: {message}")]
pub struct SecretLookupError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct SecretBundle {
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

fn secret_not_found(name: &str, source: impl Into<BackendError>) -> Error {
    Error::SecretNotFound {
        name: name.to_string(),
        source: source.into(),
    }
}

/// Authenticated Key Vault secrets client.
///
/// The identity token is fetched on the first read and reused for every
/// later read made through this client.
pub struct KeyVaultClient {
    vault_url: String,
    identity: Arc<dyn IdentityProvider>,
    client: Client,
    bearer: OnceCell<SecretString>,
}

impl KeyVaultClient {
    pub fn new(vault_url: impl Into<String>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            vault_url: vault_url.into(),
            identity,
            client: Client::new(),
            bearer: OnceCell::new(),
        }
    }

    pub fn vault_url(&self) -> &str {
        &self.vault_url
    }

    async fn bearer(&self) -> Result<SecretString> {
        self.bearer
            .get_or_try_init(|| self.identity.get_token(KEYVAULT_SCOPE))
            .await
            .cloned()
    }

    /// Read the current version of a secret.
    ///
    /// A missing, forbidden, or empty secret is [`Error::SecretNotFound`].
    /// Any other non-success answer (throttling, outages) is
    /// [`Error::SecretStore`].
    pub async fn get_secret(&self, name: &str) -> Result<SecretString> {
        let url = format!(
            "{}/secrets/{}",
            self.vault_url.trim_end_matches('/'),
            urlencoding::encode(name)
        );

        tracing::debug!(secret = name, vault = %self.vault_url, "Reading secret from key vault");

        let bearer = self.bearer().await?;
        let response = self
            .client
            .get(&url)
            .query(&[("api-version", API_VERSION)])
            .bearer_auth(bearer.expose_secret())
            .send()
            .await
            .map_err(|e| Error::transport(format!("key vault request for {name:?} failed"), e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ErrorEnvelope>(&body) {
                Ok(envelope) => format!("{}: {}", envelope.error.code, envelope.error.message),
                Err(_) => body,
            };
            let lookup = SecretLookupError { status, message };
            return Err(match status {
                StatusCode::NOT_FOUND | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    secret_not_found(name, lookup)
                }
                _ => Error::SecretStore {
                    name: name.to_string(),
                    source: lookup,
                },
            });
        }

        let bundle: SecretBundle = response
            .json()
            .await
            .map_err(|e| secret_not_found(name, e))?;

        bundle
            .value
            .filter(|value| !value.is_empty())
            .map(SecretString::from)
            .ok_or_else(|| secret_not_found(name, "secret has no value"))
    }
}

/// OAuth credentials whose inputs are read from Azure Key Vault.
pub struct KeyVaultCredentials {
    vault_url: String,
    names: SecretNames,
    identity: Arc<dyn IdentityProvider>,
    store: OnceLock<KeyVaultClient>,
    exchange: TokenExchange,
}

impl KeyVaultCredentials {
    /// Create credentials for a vault.
    ///
    /// Falls back to `AZURE_KEYVAULT_URL` when `vault_url` is `None` or empty,
    /// and fails with [`Error::Configuration`] if neither provides one. Uses
    /// the default secret names and [`DefaultIdentityChain`].
    pub fn new(vault_url: Option<String>) -> Result<Self> {
        let vault_url = resolve_vault_url(vault_url, std::env::var(KEYVAULT_URL_ENV).ok())?;

        Ok(Self {
            vault_url,
            names: SecretNames::default(),
            identity: Arc::new(DefaultIdentityChain::new()),
            store: OnceLock::new(),
            exchange: TokenExchange::new(),
        })
    }

    pub fn with_secret_names(mut self, names: SecretNames) -> Self {
        self.names = names;
        self
    }

    /// Authenticate to the vault with this provider instead of the default chain.
    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_exchange(mut self, exchange: TokenExchange) -> Self {
        self.exchange = exchange;
        self
    }

    pub fn vault_url(&self) -> &str {
        &self.vault_url
    }

    pub fn secret_names(&self) -> &SecretNames {
        &self.names
    }

    /// The secrets client, created on first use.
    pub fn secrets_client(&self) -> &KeyVaultClient {
        self.store
            .get_or_init(|| KeyVaultClient::new(self.vault_url.clone(), self.identity.clone()))
    }

    async fn read(&self, name: &str) -> Result<String> {
        let value = self.secrets_client().get_secret(name).await?;
        Ok(value.expose_secret().to_string())
    }
}

fn resolve_vault_url(explicit: Option<String>, from_env: Option<String>) -> Result<String> {
    explicit
        .filter(|url| !url.is_empty())
        .or_else(|| from_env.filter(|url| !url.is_empty()))
        .ok_or_else(|| {
            Error::Configuration(format!(
                "Key Vault URL required (argument or {KEYVAULT_URL_ENV})"
            ))
        })
}

#[async_trait::async_trait]
impl WarehouseCredentials for KeyVaultCredentials {
    async fn server_hostname(&self) -> Result<String> {
        self.read(&self.names.server_hostname).await
    }

    async fn http_path(&self) -> Result<String> {
        self.read(&self.names.http_path).await
    }

    async fn access_token(&self) -> Result<SecretString> {
        self.exchange.access_token(self).await
    }
}

#[async_trait::async_trait]
impl OAuthIdentity for KeyVaultCredentials {
    async fn client_id(&self) -> Result<String> {
        self.read(&self.names.client_id).await
    }

    async fn client_secret(&self) -> Result<SecretString> {
        self.secrets_client()
            .get_secret(&self.names.client_secret)
            .await
    }
}

impl std::fmt::Debug for KeyVaultCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVaultCredentials")
            .field("vault_url", &self.vault_url)
            .field("names", &self.names)
            .field("identity", &self.identity.name())
            .finish_non_exhaustive()
    }
}
