mod support;

use std::sync::Arc;

use anyhow::Result;
use support::{OpenCall, RecordingBackend};
use warehouse::{open_connection, Error, Field, PatCredentials, WarehouseClient};

fn pat() -> PatCredentials {
    PatCredentials::new("h", "/p", "t")
}

#[tokio::test]
async fn factory_opens_backend_with_resolved_triple() -> Result<()> {
    let backend = RecordingBackend::new();

    let mut conn = open_connection(&pat(), &backend).await?;
    let rows = conn.execute("SELECT current_user()").await?;
    conn.close()?;

    assert_eq!(rows, vec![vec![Some("alice@example.com".to_string())]]);
    assert_eq!(
        backend.open_calls(),
        vec![OpenCall {
            server_hostname: "h".to_string(),
            http_path: "/p".to_string(),
            access_token: "t".to_string(),
        }]
    );
    assert_eq!(backend.close_count(), 1);

    Ok(())
}

#[tokio::test]
async fn factory_closes_once_when_usage_block_fails() -> Result<()> {
    let backend = RecordingBackend::new();
    let client = WarehouseClient::new(Arc::new(pat()), backend.clone());

    let err = client
        .with_connection(|conn| Box::pin(async move { conn.execute("FAIL please").await }))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Query(_)), "{err:?}");
    assert_eq!(backend.open_calls().len(), 1);
    assert_eq!(backend.close_count(), 1);

    Ok(())
}

#[tokio::test]
async fn factory_closes_once_on_success() -> Result<()> {
    let backend = RecordingBackend::new();
    let client = WarehouseClient::new(Arc::new(pat()), backend.clone());

    let rows = client
        .with_connection(|conn| Box::pin(async move { conn.execute("SELECT 1").await }))
        .await?;

    assert_eq!(rows.len(), 1);
    assert_eq!(backend.close_count(), 1);

    Ok(())
}

#[tokio::test]
async fn dropped_connection_is_closed_once() -> Result<()> {
    let backend = RecordingBackend::new();

    {
        let mut conn = open_connection(&pat(), &backend).await?;
        let result: warehouse::Result<()> = async {
            conn.execute("FAIL early").await?;
            Ok(())
        }
        .await;
        assert!(result.is_err());
    }

    assert_eq!(backend.close_count(), 1);
    Ok(())
}

#[tokio::test]
async fn backend_failure_is_connection_error() -> Result<()> {
    let backend = RecordingBackend::refusing();

    let err = open_connection(&pat(), &backend).await.err().expect("open should fail");

    match err {
        Error::Connection { hostname, source } => {
            assert_eq!(hostname, "h");
            assert_eq!(source.to_string(), "connection refused");
        }
        other => panic!("expected Connection error, got {other:?}"),
    }
    assert_eq!(backend.close_count(), 0);

    Ok(())
}

#[tokio::test]
async fn unresolved_credentials_never_reach_backend() -> Result<()> {
    let backend = RecordingBackend::new();
    let creds = PatCredentials::from_parts(Some("h".to_string()), None, Some("t".to_string()));

    let err = open_connection(&creds, &backend).await.err().expect("open should fail");

    assert!(
        matches!(err, Error::Resolution { field: Field::HttpPath }),
        "{err:?}"
    );
    assert!(backend.open_calls().is_empty());

    Ok(())
}
