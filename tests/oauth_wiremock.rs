mod support;

use std::sync::Arc;

use anyhow::Result;
use secrecy::ExposeSecret;
use support::RecordingBackend;
use warehouse::{Error, OAuthStaticCredentials, TokenExchange, WarehouseClient, WarehouseCredentials};
use wiremock::matchers::{basic_auth, body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn credentials(server: &MockServer) -> OAuthStaticCredentials {
    OAuthStaticCredentials::new(
        "adb-1234.azuredatabricks.net",
        "/sql/1.0/warehouses/abc123",
        "sp-client-id",
        "sp-client-secret",
    )
    .with_exchange(TokenExchange::new().with_base_url(server.uri()))
}

#[tokio::test]
async fn oauth_exchange_sends_client_credentials_grant_once() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oidc/v1/token"))
        .and(basic_auth("sp-client-id", "sp-client-secret"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string("grant_type=client_credentials&scope=all-apis"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"access_token":"tok123","token_type":"Bearer","expires_in":3600}"#,
            "application/json",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let creds = credentials(&server);

    let first = creds.access_token().await?;
    let second = creds.access_token().await?;

    assert_eq!(first.expose_secret(), "tok123");
    assert_eq!(second.expose_secret(), "tok123");

    server.verify().await;
    Ok(())
}

#[tokio::test]
async fn oauth_failed_exchange_is_not_cached() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oidc/v1/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/oidc/v1/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(r#"{"access_token":"second-try"}"#, "application/json"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let creds = credentials(&server);

    match creds.access_token().await {
        Err(Error::AuthExchange { status, body }) => {
            assert_eq!(status.as_u16(), 401);
            assert_eq!(body, "invalid_client");
        }
        other => panic!("expected AuthExchange error, got {other:?}"),
    }

    let token = creds.access_token().await?;
    assert_eq!(token.expose_secret(), "second-try");

    server.verify().await;
    Ok(())
}

#[tokio::test]
async fn oauth_response_without_access_token_is_malformed() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oidc/v1/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(r#"{"token_type":"Bearer"}"#, "application/json"),
        )
        .mount(&server)
        .await;

    let creds = credentials(&server);
    let err = creds.access_token().await.unwrap_err();
    assert!(matches!(err, Error::MalformedTokenResponse { .. }), "{err:?}");

    Ok(())
}

#[tokio::test]
async fn oauth_non_json_body_is_malformed() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oidc/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
        .mount(&server)
        .await;

    let creds = credentials(&server);
    let err = creds.access_token().await.unwrap_err();
    assert!(matches!(err, Error::MalformedTokenResponse { .. }), "{err:?}");

    Ok(())
}

#[tokio::test]
async fn oauth_token_flows_into_connection_factory() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oidc/v1/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(r#"{"access_token":"tok123"}"#, "application/json"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let backend = RecordingBackend::new();
    let client = WarehouseClient::new(Arc::new(credentials(&server)), backend.clone());

    client.connection().await?.close()?;
    client.connection().await?.close()?;

    let opens = backend.open_calls();
    assert_eq!(opens.len(), 2);
    for call in &opens {
        assert_eq!(call.server_hostname, "adb-1234.azuredatabricks.net");
        assert_eq!(call.http_path, "/sql/1.0/warehouses/abc123");
        assert_eq!(call.access_token, "tok123");
    }
    assert_eq!(backend.close_count(), 2);

    server.verify().await;
    Ok(())
}
