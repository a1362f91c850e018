//! SQL Statement Execution API backend.
//!
//! Runs statements over `POST /api/2.0/sql/statements` on the workspace
//! host, authenticated with the resolved access token. Statements that
//! outlive the initial wait are polled until they finish, and results split
//! across chunks are fetched in order. The API is stateless, so opening a
//! connection only validates the HTTP path and closing it only marks the
//! handle unusable.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{ConnectParams, ConnectionBackend, Row, WarehouseConnection};
use crate::error::BackendError;

const STATEMENTS_PATH: &str = "/api/2.0/sql/statements";

/// Longest the server may hold a request open before answering.
const DEFAULT_WAIT_TIMEOUT: &str = "30s";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum StatementError {
    #[error("http_path {0:?} does not name a SQL warehouse")]
    InvalidHttpPath(String),

    #[error("statement API returned {status}: {body}")]
    Http { status: StatusCode, body: String },

    #[error("statement {state}: {message}")]
    Failed { state: String, message: String },

    #[error("statement is {state} but the response has no statement_id")]
    MissingStatementId { state: String },

    #[error("statement request failed")]
    Transport(#[from] reqwest::Error),

    #[error("connection is closed")]
    Closed,
}

/// Extract the warehouse id from `/sql/1.0/warehouses/{id}` (or the older
/// `/sql/1.0/endpoints/{id}`).
fn warehouse_id(http_path: &str) -> Option<&str> {
    let trimmed = http_path.trim_end_matches('/');
    let (_, id) = trimmed
        .rsplit_once("/warehouses/")
        .or_else(|| trimmed.rsplit_once("/endpoints/"))?;

    (!id.is_empty() && !id.contains('/')).then_some(id)
}

#[derive(Debug, Clone)]
pub struct StatementApiBackend {
    client: Client,
    base_url: Option<String>,
    poll_interval: Duration,
}

impl StatementApiBackend {
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            base_url: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Send requests to `base_url` instead of `https://{server_hostname}`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Delay between status checks for a statement that is still running.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl Default for StatementApiBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ConnectionBackend for StatementApiBackend {
    type Connection = StatementApiConnection;

    async fn open(&self, params: ConnectParams) -> Result<Self::Connection, BackendError> {
        let warehouse_id = warehouse_id(&params.http_path)
            .ok_or_else(|| StatementError::InvalidHttpPath(params.http_path.clone()))?
            .to_string();

        let base_url = match &self.base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://{}", params.server_hostname),
        };

        Ok(StatementApiConnection {
            client: self.client.clone(),
            base_url,
            warehouse_id,
            access_token: params.access_token,
            poll_interval: self.poll_interval,
            closed: false,
        })
    }
}

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    statement: &'a str,
    warehouse_id: &'a str,
    wait_timeout: &'a str,
    on_wait_timeout: &'a str,
    disposition: &'a str,
    format: &'a str,
}

#[derive(Debug, Deserialize)]
struct StatementResponse {
    #[serde(default)]
    statement_id: Option<String>,
    status: StatementStatus,
    #[serde(default)]
    result: Option<ResultData>,
}

#[derive(Debug, Deserialize)]
struct StatementStatus {
    state: String,
    #[serde(default)]
    error: Option<ServiceError>,
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ResultData {
    #[serde(default)]
    data_array: Vec<Row>,
    #[serde(default)]
    next_chunk_internal_link: Option<String>,
}

/// Handle for one warehouse over the statement API.
#[derive(Debug)]
pub struct StatementApiConnection {
    client: Client,
    base_url: String,
    warehouse_id: String,
    access_token: SecretString,
    poll_interval: Duration,
    closed: bool,
}

impl StatementApiConnection {
    pub fn warehouse_id(&self) -> &str {
        &self.warehouse_id
    }

    async fn run(&self, sql: &str) -> Result<Vec<Row>, StatementError> {
        if self.closed {
            return Err(StatementError::Closed);
        }

        let url = format!("{}{STATEMENTS_PATH}", self.base_url);
        let request = ExecuteRequest {
            statement: sql,
            warehouse_id: &self.warehouse_id,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            on_wait_timeout: "CONTINUE",
            disposition: "INLINE",
            format: "JSON_ARRAY",
        };

        tracing::debug!(warehouse_id = %self.warehouse_id, "Executing statement");

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.access_token.expose_secret())
            .json(&request)
            .send()
            .await?;
        let mut statement: StatementResponse = read_json(response).await?;

        while matches!(statement.status.state.as_str(), "PENDING" | "RUNNING") {
            let Some(statement_id) = statement.statement_id.as_deref() else {
                return Err(StatementError::MissingStatementId {
                    state: statement.status.state,
                });
            };

            tracing::debug!(statement_id, state = %statement.status.state, "Waiting for statement");
            tokio::time::sleep(self.poll_interval).await;

            let status_url = format!("{url}/{}", urlencoding::encode(statement_id));
            statement = read_json(self.get(&status_url).await?).await?;
        }

        if statement.status.state != "SUCCEEDED" {
            return Err(StatementError::Failed {
                message: statement.status.error.map(|e| e.message).unwrap_or_default(),
                state: statement.status.state,
            });
        }

        let Some(mut chunk) = statement.result else {
            return Ok(Vec::new());
        };
        let mut rows = std::mem::take(&mut chunk.data_array);
        while let Some(link) = chunk.next_chunk_internal_link.take() {
            let chunk_url = format!("{}{link}", self.base_url);
            chunk = read_json(self.get(&chunk_url).await?).await?;
            rows.append(&mut chunk.data_array);
        }

        Ok(rows)
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, StatementError> {
        Ok(self
            .client
            .get(url)
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await?)
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, StatementError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(StatementError::Http { status, body });
    }
    Ok(response.json().await?)
}

#[async_trait::async_trait]
impl WarehouseConnection for StatementApiConnection {
    async fn execute(&mut self, sql: &str) -> Result<Vec<Row>, BackendError> {
        Ok(self.run(sql).await?)
    }

    fn close(&mut self) -> Result<(), BackendError> {
        self.closed = true;
        Ok(())
    }
}
