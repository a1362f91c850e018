//! OAuth client-credentials token exchange.
//!
//! Every OAuth-based credential variant owns a [`TokenExchange`] and hands
//! itself to [`TokenExchange::access_token`], so the grant is implemented in
//! exactly one place.

use std::time::Duration;

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::OnceCell;

use super::{require, require_secret, OAuthIdentity, WarehouseCredentials};
use crate::error::{Error, Field, Result};

/// Upper bound for a single token request.
pub const TOKEN_TIMEOUT: Duration = Duration::from_secs(30);

const TOKEN_PATH: &str = "/oidc/v1/token";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// Runs the client-credentials grant and memoizes the resulting token.
///
/// Only a successful exchange is stored. A failed attempt leaves the cache
/// empty, so the next call performs the full exchange again. There is no
/// expiry tracking: the token lives as long as this value.
#[derive(Debug)]
pub struct TokenExchange {
    client: Client,
    base_url: Option<String>,
    token: OnceCell<SecretString>,
}

impl TokenExchange {
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            base_url: None,
            token: OnceCell::new(),
        }
    }

    /// Send token requests to `{base_url}/oidc/v1/token` instead of
    /// `https://{server_hostname}/oidc/v1/token`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Token endpoint for a workspace hostname.
    pub fn token_url(&self, server_hostname: &str) -> String {
        match &self.base_url {
            Some(base) => format!("{}{TOKEN_PATH}", base.trim_end_matches('/')),
            None => format!("https://{server_hostname}{TOKEN_PATH}"),
        }
    }

    /// The memoized token, if an exchange has already succeeded.
    pub fn cached(&self) -> Option<&SecretString> {
        self.token.get()
    }

    /// Return the memoized token, exchanging `identity`'s client credentials
    /// for one first if needed.
    pub async fn access_token<I>(&self, identity: &I) -> Result<SecretString>
    where
        I: OAuthIdentity + ?Sized,
    {
        self.token
            .get_or_try_init(|| self.exchange(identity))
            .await
            .cloned()
    }

    async fn exchange<I>(&self, identity: &I) -> Result<SecretString>
    where
        I: OAuthIdentity + ?Sized,
    {
        let server_hostname = identity.server_hostname().await?;
        let url = self.token_url(&server_hostname);
        let client_id = identity.client_id().await?;
        let client_secret = identity.client_secret().await?;

        if client_id.is_empty() {
            return Err(Error::Resolution {
                field: Field::ClientId,
            });
        }
        if client_secret.expose_secret().is_empty() {
            return Err(Error::Resolution {
                field: Field::ClientSecret,
            });
        }

        tracing::debug!(url = %url, client_id = %client_id, "Requesting OAuth access token");

        let response = self
            .client
            .post(&url)
            .basic_auth(&client_id, Some(client_secret.expose_secret()))
            .form(&[("grant_type", "client_credentials"), ("scope", "all-apis")])
            .timeout(TOKEN_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::transport(format!("token request to {url} failed"), e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::AuthExchange { status, body });
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::transport("failed to read token response", e))?;
        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(|e| Error::MalformedTokenResponse {
                reason: format!("invalid JSON: {e}"),
            })?;

        match parsed.access_token {
            Some(token) if !token.is_empty() => {
                tracing::info!(server_hostname = %server_hostname, "Acquired OAuth access token");
                Ok(SecretString::from(token))
            }
            _ => Err(Error::MalformedTokenResponse {
                reason: "missing access_token field".to_string(),
            }),
        }
    }
}

impl Default for TokenExchange {
    fn default() -> Self {
        Self::new()
    }
}

/// OAuth client credentials supplied directly (e.g. from a config file).
///
/// Nothing is validated at construction. An absent or empty field fails
/// with [`Error::Resolution`] the first time it is read.
#[derive(Debug)]
pub struct OAuthStaticCredentials {
    server_hostname: Option<String>,
    http_path: Option<String>,
    client_id: Option<String>,
    client_secret: Option<SecretString>,
    exchange: TokenExchange,
}

impl OAuthStaticCredentials {
    pub fn new(
        server_hostname: impl Into<String>,
        http_path: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self::from_parts(
            Some(server_hostname.into()),
            Some(http_path.into()),
            Some(client_id.into()),
            Some(client_secret.into()),
        )
    }

    /// Build from possibly-missing values, deferring errors to first read.
    pub fn from_parts(
        server_hostname: Option<String>,
        http_path: Option<String>,
        client_id: Option<String>,
        client_secret: Option<String>,
    ) -> Self {
        Self {
            server_hostname,
            http_path,
            client_id,
            client_secret: client_secret.map(SecretString::from),
            exchange: TokenExchange::new(),
        }
    }

    /// Replace the token exchange (custom HTTP client or endpoint base).
    pub fn with_exchange(mut self, exchange: TokenExchange) -> Self {
        self.exchange = exchange;
        self
    }
}

#[async_trait::async_trait]
impl WarehouseCredentials for OAuthStaticCredentials {
    async fn server_hostname(&self) -> Result<String> {
        require(Field::ServerHostname, self.server_hostname.as_deref())
    }

    async fn http_path(&self) -> Result<String> {
        require(Field::HttpPath, self.http_path.as_deref())
    }

    async fn access_token(&self) -> Result<SecretString> {
        self.exchange.access_token(self).await
    }
}

#[async_trait::async_trait]
impl OAuthIdentity for OAuthStaticCredentials {
    async fn client_id(&self) -> Result<String> {
        require(Field::ClientId, self.client_id.as_deref())
    }

    async fn client_secret(&self) -> Result<SecretString> {
        require_secret(Field::ClientSecret, self.client_secret.as_ref())
    }
}
