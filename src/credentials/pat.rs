//! Personal access token credentials.

use secrecy::SecretString;

use super::{require, require_secret, WarehouseCredentials};
use crate::error::{Field, Result};

/// A pre-issued access token used as-is. Never touches the network.
#[derive(Debug, Clone)]
pub struct PatCredentials {
    server_hostname: Option<String>,
    http_path: Option<String>,
    access_token: Option<SecretString>,
}

impl PatCredentials {
    pub fn new(
        server_hostname: impl Into<String>,
        http_path: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self::from_parts(
            Some(server_hostname.into()),
            Some(http_path.into()),
            Some(access_token.into()),
        )
    }

    /// Build from possibly-missing values, deferring errors to first read.
    pub fn from_parts(
        server_hostname: Option<String>,
        http_path: Option<String>,
        access_token: Option<String>,
    ) -> Self {
        Self {
            server_hostname,
            http_path,
            access_token: access_token.map(SecretString::from),
        }
    }
}

#[async_trait::async_trait]
impl WarehouseCredentials for PatCredentials {
    async fn server_hostname(&self) -> Result<String> {
        require(Field::ServerHostname, self.server_hostname.as_deref())
    }

    async fn http_path(&self) -> Result<String> {
        require(Field::HttpPath, self.http_path.as_deref())
    }

    async fn access_token(&self) -> Result<SecretString> {
        require_secret(Field::AccessToken, self.access_token.as_ref())
    }
}
