//! Identity providers for authenticating to the secret store.
//!
//! Key Vault requests carry a bearer token issued by Microsoft Entra ID. The
//! credential types never obtain that token themselves: they hold an
//! [`IdentityProvider`] and ask it for one. Callers can pass a provider they
//! already authenticated, or fall back to [`DefaultIdentityChain`], which
//! tries, in order:
//!
//! 1. a service principal from `AZURE_TENANT_ID`, `AZURE_CLIENT_ID` and
//!    `AZURE_CLIENT_SECRET`,
//! 2. the instance metadata service (managed identity),
//! 3. the Azure CLI (`az account get-access-token`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::{Error, Result};

/// Scope requested for Key Vault data-plane access.
pub const KEYVAULT_SCOPE: &str = "https://vault.azure.net/.default";

pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

pub const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

/// Off Azure the metadata endpoint is unroutable; fail fast there.
const IMDS_TIMEOUT: Duration = Duration::from_secs(2);

/// Produces bearer tokens for a requested scope.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Short name used in logs and aggregated errors.
    fn name(&self) -> &str;

    async fn get_token(&self, scope: &str) -> Result<SecretString>;
}

/// Convert a v2 scope (`https://vault.azure.net/.default`) to the v1
/// resource form expected by IMDS and the Azure CLI.
fn scope_to_resource(scope: &str) -> &str {
    scope.strip_suffix("/.default").unwrap_or(scope)
}

#[derive(Debug, Deserialize)]
struct EntraTokenResponse {
    access_token: Option<String>,
}

async fn read_entra_token(source: &str, response: reqwest::Response) -> Result<SecretString> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::identity(format!(
            "{source} token request failed ({status}): {body}"
        )));
    }

    let parsed: EntraTokenResponse = response
        .json()
        .await
        .map_err(|e| Error::identity(format!("{source} returned an invalid token response: {e}")))?;

    parsed
        .access_token
        .filter(|t| !t.is_empty())
        .map(SecretString::from)
        .ok_or_else(|| Error::identity(format!("{source} response has no access_token")))
}

/// An already-issued bearer token.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    token: SecretString,
}

impl StaticIdentity {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    fn name(&self) -> &str {
        "static"
    }

    async fn get_token(&self, _scope: &str) -> Result<SecretString> {
        Ok(self.token.clone())
    }
}

/// Service principal authenticated with a client secret.
#[derive(Debug)]
pub struct ClientSecretIdentity {
    tenant_id: String,
    client_id: String,
    client_secret: SecretString,
    authority_host: String,
    client: Client,
}

impl ClientSecretIdentity {
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: SecretString::from(client_secret.into()),
            authority_host: DEFAULT_AUTHORITY_HOST.to_string(),
            client: Client::new(),
        }
    }

    /// Read `AZURE_TENANT_ID`, `AZURE_CLIENT_ID` and `AZURE_CLIENT_SECRET`.
    ///
    /// Returns `None` unless all three are set and non-empty.
    pub fn from_env() -> Option<Self> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Some(Self::new(
            var("AZURE_TENANT_ID")?,
            var("AZURE_CLIENT_ID")?,
            var("AZURE_CLIENT_SECRET")?,
        ))
    }

    pub fn with_authority_host(mut self, authority_host: impl Into<String>) -> Self {
        self.authority_host = authority_host.into();
        self
    }

    fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host.trim_end_matches('/'),
            self.tenant_id
        )
    }
}

#[async_trait]
impl IdentityProvider for ClientSecretIdentity {
    fn name(&self) -> &str {
        "environment"
    }

    async fn get_token(&self, scope: &str) -> Result<SecretString> {
        let url = self.token_url();
        let response = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret()),
                ("scope", scope),
            ])
            .send()
            .await
            .map_err(|e| Error::transport(format!("token request to {url} failed"), e))?;

        read_entra_token(self.name(), response).await
    }
}

/// Managed identity via the instance metadata service.
#[derive(Debug)]
pub struct ManagedIdentity {
    endpoint: String,
    client_id: Option<String>,
    client: Client,
}

impl ManagedIdentity {
    pub fn new() -> Self {
        Self {
            endpoint: IMDS_ENDPOINT.to_string(),
            client_id: None,
            client: Client::new(),
        }
    }

    /// Use `AZURE_CLIENT_ID` to select a user-assigned identity when set.
    pub fn from_env() -> Self {
        let mut identity = Self::new();
        identity.client_id = std::env::var("AZURE_CLIENT_ID")
            .ok()
            .filter(|v| !v.is_empty());
        identity
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
}

impl Default for ManagedIdentity {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for ManagedIdentity {
    fn name(&self) -> &str {
        "managed_identity"
    }

    async fn get_token(&self, scope: &str) -> Result<SecretString> {
        let mut query = vec![
            ("api-version", "2018-02-01"),
            ("resource", scope_to_resource(scope)),
        ];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.as_str()));
        }

        let response = self
            .client
            .get(&self.endpoint)
            .query(&query)
            .header("Metadata", "true")
            .timeout(IMDS_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::transport("instance metadata service unreachable", e))?;

        read_entra_token(self.name(), response).await
    }
}

/// Token from the signed-in Azure CLI user.
#[derive(Debug, Clone)]
pub struct AzureCliIdentity {
    program: String,
}

impl AzureCliIdentity {
    pub fn new() -> Self {
        Self {
            program: "az".to_string(),
        }
    }

    /// Run a different executable instead of `az` (e.g. a wrapper script).
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for AzureCliIdentity {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract `accessToken` from `az account get-access-token --output json`.
fn parse_cli_output(stdout: &str) -> Result<SecretString> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct CliToken {
        access_token: Option<String>,
    }

    let parsed: CliToken = serde_json::from_str(stdout)
        .map_err(|e| Error::identity(format!("invalid Azure CLI output: {e}")))?;

    parsed
        .access_token
        .filter(|t| !t.is_empty())
        .map(SecretString::from)
        .ok_or_else(|| Error::identity("Azure CLI output has no accessToken"))
}

#[async_trait]
impl IdentityProvider for AzureCliIdentity {
    fn name(&self) -> &str {
        "azure_cli"
    }

    async fn get_token(&self, scope: &str) -> Result<SecretString> {
        let output = tokio::process::Command::new(&self.program)
            .args(["account", "get-access-token", "--output", "json"])
            .arg("--resource")
            .arg(scope_to_resource(scope))
            .output()
            .await
            .map_err(|e| Error::identity(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::identity(format!(
                "{} get-access-token failed: {}",
                self.program,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8(output.stdout)
            .map_err(|_| Error::identity("invalid UTF-8 in Azure CLI output"))?;
        parse_cli_output(&stdout)
    }
}

/// Tries each source in order and returns the first token produced.
pub struct DefaultIdentityChain {
    sources: Vec<Box<dyn IdentityProvider>>,
}

impl DefaultIdentityChain {
    /// Environment service principal (if configured), managed identity,
    /// then the Azure CLI.
    pub fn new() -> Self {
        let mut sources: Vec<Box<dyn IdentityProvider>> = Vec::new();
        if let Some(env) = ClientSecretIdentity::from_env() {
            sources.push(Box::new(env));
        }
        sources.push(Box::new(ManagedIdentity::from_env()));
        sources.push(Box::new(AzureCliIdentity::new()));
        Self { sources }
    }

    pub fn from_sources(sources: Vec<Box<dyn IdentityProvider>>) -> Self {
        Self { sources }
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }
}

impl Default for DefaultIdentityChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for DefaultIdentityChain {
    fn name(&self) -> &str {
        "default_chain"
    }

    async fn get_token(&self, scope: &str) -> Result<SecretString> {
        let mut failures = Vec::new();

        for source in &self.sources {
            match source.get_token(scope).await {
                Ok(token) => {
                    tracing::debug!(source = source.name(), "Resolved secret store identity");
                    return Ok(token);
                }
                Err(err) => {
                    tracing::debug!(source = source.name(), error = %err, "Identity source failed");
                    failures.push(format!("{}: {err}", source.name()));
                }
            }
        }

        if failures.is_empty() {
            return Err(Error::identity("no identity sources configured"));
        }
        Err(Error::identity(format!(
            "no identity source produced a token ({})",
            failures.join("; ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    struct Failing;

    #[async_trait]
    impl IdentityProvider for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn get_token(&self, _scope: &str) -> Result<SecretString> {
            Err(Error::identity("nope"))
        }
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl IdentityProvider for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn get_token(&self, _scope: &str) -> Result<SecretString> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(SecretString::from("later".to_string()))
        }
    }

    #[test]
    fn test_scope_to_resource() {
        assert_eq!(scope_to_resource(KEYVAULT_SCOPE), "https://vault.azure.net");
        assert_eq!(scope_to_resource("https://x"), "https://x");
    }

    #[test]
    fn test_parse_cli_output() {
        let out = r#"{
            "accessToken": "eyJ0eXAi",
            "expiresOn": "2026-10-18 12:00:00.000000",
            "subscription": "sub",
            "tenant": "tenant",
            "tokenType": "Bearer"
        }"#;
        assert_eq!(parse_cli_output(out).unwrap().expose_secret(), "eyJ0eXAi");
        assert!(parse_cli_output(r#"{"tokenType":"Bearer"}"#).is_err());
        assert!(parse_cli_output("not json").is_err());
    }

    #[tokio::test]
    async fn test_chain_returns_first_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = DefaultIdentityChain::from_sources(vec![
            Box::new(Failing),
            Box::new(StaticIdentity::new("first")),
            Box::new(Counting(calls.clone())),
        ]);

        let token = chain.get_token(KEYVAULT_SCOPE).await.unwrap();
        assert_eq!(token.expose_secret(), "first");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_chain_aggregates_failures() {
        let chain = DefaultIdentityChain::from_sources(vec![Box::new(Failing), Box::new(Failing)]);

        let err = chain.get_token(KEYVAULT_SCOPE).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("failing: identity provider failed: nope"));
        assert!(matches!(err, Error::Identity { .. }));
    }

    #[tokio::test]
    async fn test_missing_cli_binary_is_identity_error() {
        let cli = AzureCliIdentity::with_program("definitely-not-an-az-binary-1b9f");
        let err = cli.get_token(KEYVAULT_SCOPE).await.unwrap_err();
        assert!(matches!(err, Error::Identity { .. }));
    }
}
