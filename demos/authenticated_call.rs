//! Authenticated calls with transparent re-authentication.
//!
//! This example shows how to:
//! - Configure a transport client with a timeout and a proxy descriptor
//! - Authenticate with a token endpoint before the first call
//! - Recover when the server reports the token as expired
//! - Probe the token endpoint as a health check
//!
//! A local mock server plays both the token endpoint and the API, so the
//! example runs offline.
//!
//! Run with: `RUST_LOG=restkeep=debug cargo run --example authenticated_call`

use restkeep::{
    AuthenticatingClient, ClientBuilder, ConnectionResult, Error, Execute, ProxyConfig, Request,
    TokenAuthenticator,
};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Item {
    id: u32,
    name: String,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("restkeep=info,authenticated_call=info")),
        )
        .init();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "t-1" })))
        .mount(&server)
        .await;
    // The first call is rejected as if the token had expired.
    Mock::given(method("GET"))
        .and(path("/items/1"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "errorMessage": "Token expired",
            "errorCode": "AUTH-EXPIRED"
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/items/1"))
        .and(header("authorization", "Bearer t-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 1,
            "name": "bolt",
            "revision": 3
        })))
        .mount(&server)
        .await;

    let transport = ClientBuilder::new()
        .timeout(Duration::from_secs(10))
        .proxy(ProxyConfig::none())
        .common_header("User-Agent", "restkeep-demo/0.1")?
        .build()?;
    let authenticator = TokenAuthenticator::new(format!("{}/token", server.uri()))?
        .field("grant_type", "client_credentials")
        .field("client_id", "demo")
        .secret_field("client_secret", "not-a-real-secret");
    let client = AuthenticatingClient::new(transport, authenticator);

    println!("=== Health check ===");
    match client.attempt_connection().await {
        ConnectionResult::Success { status } => println!("Token endpoint answered {}", status),
        ConnectionResult::Failure { status, message, .. } => {
            println!("Token endpoint failed ({:?}): {}", status, message)
        }
    }
    println!();

    println!("=== Authenticated GET ===");
    let item: Item = client
        .fetch_json(Request::get(format!("{}/items/1", server.uri()))?)
        .await?;
    println!("Item: {:?}", item);

    let requests = server.received_requests().await.unwrap_or_default();
    println!("Server saw {} requests", requests.len());

    Ok(())
}
