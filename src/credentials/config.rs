//! Credential configuration.
//!
//! Defines the format for `warehouse.toml` files that select an
//! authentication strategy and supply its inputs.

use std::path::Path;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::keyvault::{KeyVaultCredentials, SecretNames};
use super::oauth::OAuthStaticCredentials;
use super::pat::PatCredentials;
use super::WarehouseCredentials;
use crate::error::{Error, Result};

/// Inputs for a personal access token.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatConfig {
    pub server_hostname: Option<String>,
    pub http_path: Option<String>,
    pub access_token: Option<SecretString>,
}

/// Inputs for a statically configured OAuth client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OAuthConfig {
    pub server_hostname: Option<String>,
    pub http_path: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
}

/// Inputs for Key Vault backed OAuth.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeyVaultConfig {
    /// Falls back to `AZURE_KEYVAULT_URL` when unset.
    pub keyvault_url: Option<String>,
    pub client_id_secret_name: Option<String>,
    pub client_secret_secret_name: Option<String>,
    pub server_hostname_secret_name: Option<String>,
    pub http_path_secret_name: Option<String>,
}

impl KeyVaultConfig {
    /// Secret names with per-field overrides applied over the defaults.
    pub fn secret_names(&self) -> SecretNames {
        let defaults = SecretNames::default();
        let pick = |value: &Option<String>, default: String| {
            value.clone().filter(|v| !v.is_empty()).unwrap_or(default)
        };
        SecretNames {
            client_id: pick(&self.client_id_secret_name, defaults.client_id),
            client_secret: pick(&self.client_secret_secret_name, defaults.client_secret),
            server_hostname: pick(&self.server_hostname_secret_name, defaults.server_hostname),
            http_path: pick(&self.http_path_secret_name, defaults.http_path),
        }
    }
}

/// Configuration for warehouse credentials.
///
/// This is typically loaded from a `warehouse.toml` file.
///
/// # Example
///
/// ```toml
/// auth = "keyvault"
/// keyvault_url = "https://my-vault.vault.azure.net"
/// http_path_secret_name = "analytics-warehouse-path"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "auth", rename_all = "lowercase")]
pub enum CredentialConfig {
    /// Pre-issued personal access token.
    Pat {
        #[serde(flatten)]
        config: PatConfig,
    },
    /// OAuth client id and secret given directly.
    OAuth {
        #[serde(flatten)]
        config: OAuthConfig,
    },
    /// OAuth client details stored in Azure Key Vault.
    KeyVault {
        #[serde(flatten)]
        config: KeyVaultConfig,
    },
}

impl CredentialConfig {
    /// Load credential configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!(
                "failed to read credentials config {}: {e}",
                path.display()
            ))
        })?;

        Self::parse(&content).map_err(|e| match e {
            Error::Configuration(msg) => {
                Error::Configuration(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    /// Load credential configuration from a file, returning None if the file doesn't exist.
    pub fn load_optional(path: &Path) -> Result<Option<Self>> {
        if path.exists() {
            Ok(Some(Self::load(path)?))
        } else {
            Ok(None)
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Configuration(format!("invalid credentials config: {e}")))
    }

    /// Name of the selected strategy, as written in the `auth` key.
    pub fn auth_kind(&self) -> &'static str {
        match self {
            CredentialConfig::Pat { .. } => "pat",
            CredentialConfig::OAuth { .. } => "oauth",
            CredentialConfig::KeyVault { .. } => "keyvault",
        }
    }

    /// Build credentials from this configuration.
    ///
    /// Only the Key Vault strategy can fail here (no vault URL). Missing
    /// fields of the static strategies surface when they are first read.
    pub fn build(&self) -> Result<Box<dyn WarehouseCredentials>> {
        let expose = |s: &Option<SecretString>| s.as_ref().map(|v| v.expose_secret().to_string());

        match self {
            CredentialConfig::Pat { config } => Ok(Box::new(PatCredentials::from_parts(
                config.server_hostname.clone(),
                config.http_path.clone(),
                expose(&config.access_token),
            ))),
            CredentialConfig::OAuth { config } => {
                Ok(Box::new(OAuthStaticCredentials::from_parts(
                    config.server_hostname.clone(),
                    config.http_path.clone(),
                    config.client_id.clone(),
                    expose(&config.client_secret),
                )))
            }
            CredentialConfig::KeyVault { config } => Ok(Box::new(
                KeyVaultCredentials::new(config.keyvault_url.clone())?
                    .with_secret_names(config.secret_names()),
            )),
        }
    }
}
