//! Re-authentication protocol tests against wiremock servers.

use restkeep::{
    AuthenticatingClient, ClientBuilder, ConnectionResult, Error, Execute, ProxyConfig, Request,
    TokenAuthenticator, UnauthorizedPolicy, MAX_AUTHENTICATION_RETRIES,
};
use http::header::AUTHORIZATION;
use http::HeaderValue;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn authenticating_client(server: &MockServer) -> AuthenticatingClient<TokenAuthenticator> {
    authenticating_client_with(server, ClientBuilder::new())
}

fn authenticating_client_with(
    server: &MockServer,
    builder: ClientBuilder,
) -> AuthenticatingClient<TokenAuthenticator> {
    let transport = builder.proxy(ProxyConfig::none()).build().unwrap();
    let authenticator = TokenAuthenticator::new(format!("{}/token", server.uri()))
        .unwrap()
        .field("grant_type", "client_credentials")
        .secret_field("client_secret", "s3cr3t");
    AuthenticatingClient::new(transport, authenticator)
}

async fn mount_token(server: &MockServer, token: &str, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": token })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn items(server: &MockServer) -> Request {
    Request::get(format!("{}/items", server.uri())).unwrap()
}

#[tokio::test]
async fn test_authenticates_before_first_request() {
    let mock_server = MockServer::start().await;
    mount_token(&mock_server, "abc", 1).await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .and(header("authorization", "Bearer abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([1, 2])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = authenticating_client(&mock_server);
    let numbers: Vec<u32> = client.fetch_json(items(&mock_server)).await.unwrap();
    assert_eq!(numbers, vec![1, 2]);
}

#[tokio::test]
async fn test_credential_is_reused_across_requests() {
    let mock_server = MockServer::start().await;
    mount_token(&mock_server, "abc", 1).await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .and(header("authorization", "Bearer abc"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = authenticating_client(&mock_server);
    for _ in 0..2 {
        let response = client.execute(items(&mock_server)).await.unwrap();
        assert_eq!(response.status_code(), Some(200));
    }
}

#[tokio::test]
async fn test_retry_bound_is_never_exceeded() {
    let mock_server = MockServer::start().await;
    let executions = MAX_AUTHENTICATION_RETRIES as u64 + 1;
    mount_token(&mock_server, "abc", executions).await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "errorMessage": "Token expired",
            "errorCode": "AUTH-1"
        })))
        .expect(executions)
        .mount(&mock_server)
        .await;

    let client = authenticating_client(&mock_server);
    let result = client.execute(items(&mock_server)).await;

    match result {
        Err(Error::UnauthorizedExhausted {
            attempts,
            last_error,
        }) => {
            assert_eq!(attempts, 3);
            assert!(last_error.is_unauthorized());
            assert!(matches!(*last_error, Error::Api(_)));
        }
        other => panic!("Expected UnauthorizedExhausted, got {:?}", other),
    }
}

#[tokio::test]
async fn test_recovers_after_one_unauthorized_answer() {
    let mock_server = MockServer::start().await;
    mount_token(&mock_server, "abc", 2).await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = authenticating_client(&mock_server);
    let mut response = client.execute(items(&mock_server)).await.unwrap();
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_stale_request_credential_is_replaced() {
    let mock_server = MockServer::start().await;
    mount_token(&mock_server, "fresh", 1).await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let request = items(&mock_server)
        .to_builder()
        .header("Authorization", "Bearer stale")
        .unwrap()
        .build()
        .unwrap();

    let client = authenticating_client(&mock_server);
    let response = client.execute(request).await.unwrap();
    assert_eq!(response.status_code(), Some(200));
}

#[tokio::test]
async fn test_already_authenticated_request_skips_authentication() {
    let mock_server = MockServer::start().await;
    mount_token(&mock_server, "abc", 0).await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .and(header("authorization", "Bearer preset"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let request = items(&mock_server)
        .to_builder()
        .header("Authorization", "Bearer preset")
        .unwrap()
        .build()
        .unwrap();

    let client = authenticating_client(&mock_server);
    assert!(client.execute(request).await.unwrap().is_status_code_success());
}

#[tokio::test]
async fn test_forbidden_is_returned_by_default() {
    let mock_server = MockServer::start().await;
    mount_token(&mock_server, "abc", 1).await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = authenticating_client(&mock_server);
    let response = client.execute(items(&mock_server)).await.unwrap();
    assert_eq!(response.status_code(), Some(403));
}

#[tokio::test]
async fn test_forbidden_is_retried_when_opted_in() {
    let mock_server = MockServer::start().await;
    mount_token(&mock_server, "abc", 3).await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(403))
        .expect(3)
        .mount(&mock_server)
        .await;

    let client =
        authenticating_client(&mock_server).with_policy(UnauthorizedPolicy::retrying_forbidden());
    let result = client.execute(items(&mock_server)).await;

    let error = result.unwrap_err();
    assert!(matches!(error, Error::UnauthorizedExhausted { attempts: 3, .. }));
    assert_eq!(error.status().map(|s| s.as_u16()), Some(403));
}

#[tokio::test]
async fn test_authentication_failure_is_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(500).set_body_string("identity provider down"))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = authenticating_client(&mock_server);
    let error = client.execute(items(&mock_server)).await.unwrap_err();

    assert!(matches!(error, Error::Authentication { .. }));
    assert_eq!(error.status().map(|s| s.as_u16()), Some(500));
    assert_eq!(error.raw_response(), Some("identity provider down"));
}

#[tokio::test]
async fn test_token_missing_from_answer_is_authentication_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token_type": "bearer" })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = authenticating_client(&mock_server);
    let error = client.execute(items(&mock_server)).await.unwrap_err();
    match error {
        Error::Authentication { source } => {
            assert!(matches!(*source, Error::DeserializationFailed { .. }))
        }
        other => panic!("Expected Authentication error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_lost_connection_is_not_retried() {
    let auth_server = MockServer::start().await;
    mount_token(&auth_server, "abc", 1).await;

    // Nothing listens on a port once its listener is dropped.
    let unreachable = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        format!("http://{}/items", listener.local_addr().unwrap())
    };

    let client = authenticating_client(&auth_server);
    let error = client
        .execute(Request::get(unreachable).unwrap())
        .await
        .unwrap_err();

    assert!(matches!(error, Error::Network { .. }), "{:?}", error);
    assert!(error.is_transport());
}

#[tokio::test]
async fn test_timeout_is_not_resent() {
    let mock_server = MockServer::start().await;
    mount_token(&mock_server, "abc", 1).await;

    Mock::given(method("POST"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_millis(1500)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = authenticating_client_with(
        &mock_server,
        ClientBuilder::new().timeout(Duration::from_millis(300)),
    );
    let order = Request::builder()
        .method(http::Method::POST)
        .url(format!("{}/orders", mock_server.uri()))
        .unwrap()
        .build()
        .unwrap();

    let error = client.execute(order).await.unwrap_err();
    assert!(matches!(error, Error::Timeout { .. }), "{:?}", error);
}

#[tokio::test]
async fn test_late_unauthorized_answer_keeps_newer_credential() {
    let mock_server = MockServer::start().await;
    mount_token(&mock_server, "fresh", 1).await;

    // The slow call is answered only after the fast one has re-authenticated.
    Mock::given(method("GET"))
        .and(path("/slow"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(500)))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fast"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fast"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = authenticating_client_with(
        &mock_server,
        ClientBuilder::new()
            .common_header("Authorization", "Bearer stale")
            .unwrap(),
    );
    let slow = Request::get(format!("{}/slow", mock_server.uri())).unwrap();
    let fast = Request::get(format!("{}/fast", mock_server.uri())).unwrap();

    let (slow, fast) = tokio::join!(client.execute(slow), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.execute(fast).await
    });

    assert_eq!(slow.unwrap().status_code(), Some(200));
    assert_eq!(fast.unwrap().status_code(), Some(200));
    assert_eq!(
        client.transport().common_headers().get(&AUTHORIZATION),
        Some(HeaderValue::from_static("Bearer fresh"))
    );
}

#[tokio::test]
async fn test_attempt_connection_reports_success() {
    let mock_server = MockServer::start().await;
    mount_token(&mock_server, "abc", 1).await;

    let client = authenticating_client(&mock_server);
    let result = client.attempt_connection().await;
    assert!(result.is_success());
    assert_eq!(result.status(), Some(200));
}

#[tokio::test]
async fn test_attempt_connection_reports_failure_without_raising() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "errorMessage": "Bad client secret"
        })))
        .mount(&mock_server)
        .await;

    let client = authenticating_client(&mock_server);
    match client.attempt_connection().await {
        ConnectionResult::Failure {
            status,
            message,
            error,
        } => {
            assert_eq!(status, Some(401));
            assert!(message.starts_with("Bad client secret"));
            assert!(matches!(error, Some(Error::Api(_))));
        }
        other => panic!("Expected Failure, got {:?}", other),
    }
}
