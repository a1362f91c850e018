#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use warehouse::error::BackendError;
use warehouse::identity::IdentityProvider;
use warehouse::{ConnectParams, ConnectionBackend, Row, WarehouseConnection};

/// Values a backend was asked to open, with the token exposed for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenCall {
    pub server_hostname: String,
    pub http_path: String,
    pub access_token: String,
}

/// Backend that records every open/close and answers statements from memory.
#[derive(Clone, Default)]
pub struct RecordingBackend {
    pub opens: Arc<Mutex<Vec<OpenCall>>>,
    pub closes: Arc<AtomicUsize>,
    pub refuse_connections: bool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing() -> Self {
        Self {
            refuse_connections: true,
            ..Self::default()
        }
    }

    pub fn open_calls(&self) -> Vec<OpenCall> {
        self.opens.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionBackend for RecordingBackend {
    type Connection = RecordingConnection;

    async fn open(&self, params: ConnectParams) -> Result<Self::Connection, BackendError> {
        self.opens.lock().unwrap().push(OpenCall {
            server_hostname: params.server_hostname,
            http_path: params.http_path,
            access_token: params.access_token.expose_secret().to_string(),
        });

        if self.refuse_connections {
            return Err("connection refused".into());
        }

        Ok(RecordingConnection {
            closes: self.closes.clone(),
        })
    }
}

pub struct RecordingConnection {
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl WarehouseConnection for RecordingConnection {
    async fn execute(&mut self, sql: &str) -> Result<Vec<Row>, BackendError> {
        if sql.contains("FAIL") {
            return Err(format!("cannot execute: {sql}").into());
        }
        Ok(vec![vec![Some("alice@example.com".to_string())]])
    }

    fn close(&mut self) -> Result<(), BackendError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Identity provider that hands out a fixed token and counts requests.
#[derive(Clone)]
pub struct CountingIdentity {
    token: String,
    pub calls: Arc<AtomicUsize>,
}

impl CountingIdentity {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for CountingIdentity {
    fn name(&self) -> &str {
        "counting"
    }

    async fn get_token(&self, _scope: &str) -> warehouse::Result<SecretString> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(SecretString::from(self.token.clone()))
    }
}
