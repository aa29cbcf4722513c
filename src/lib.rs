//! # Restkeep - An authenticated REST client runtime
//!
//! Restkeep issues HTTP requests against a remote REST API on top of
//! `reqwest`. It handles TLS trust, proxy routing with credential injection,
//! transparent re-authentication and translation of server error bodies. It
//! also keeps server-owned JSON fields alive when a response is deserialized
//! into a type that does not model all of them.
//!
//! ## Quick Start
//!
//! ```no_run
//! use restkeep::{
//!     AuthenticatingClient, Execute, ProxyConfig, Request, TokenAuthenticator, TransportClient,
//! };
//! use serde::Deserialize;
//! use std::time::Duration;
//!
//! #[derive(Deserialize)]
//! struct Item {
//!     id: u64,
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), restkeep::Error> {
//!     let transport = TransportClient::builder()
//!         .timeout(Duration::from_secs(30))
//!         .proxy(ProxyConfig::none())
//!         .build()?;
//!
//!     let authenticator = TokenAuthenticator::new("https://auth.example.com/token")?
//!         .field("grant_type", "client_credentials")
//!         .field("client_id", "inventory-sync")
//!         .secret_field("client_secret", "s3cr3t");
//!     let client = AuthenticatingClient::new(transport, authenticator);
//!
//!     let request = Request::get("https://api.example.com/items/42")?;
//!     let item: Item = client.fetch_json(request).await?;
//!     println!("{} {}", item.id, item.name);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Declarative requests** - Immutable [`Request`] values built with a fluent builder
//! - **Polymorphic bodies** - Files, text, forms, multipart and serializable objects via [`BodyContent`]
//! - **Bounded re-authentication** - At most [`MAX_AUTHENTICATION_RETRIES`] retries per call
//! - **Proxy support** - Basic and NTLM-style account credentials, updatable at runtime
//! - **Error translation** - Structured `errorMessage` / `errorCode` bodies become [`ApiError`]s
//! - **Lossless round trips** - [`Reconciled`] replays fields your types do not declare
//! - **Automatic logging** - Structured logging with `tracing`
//!
//! ## Error Handling
//!
//! Failed statuses are turned into errors that keep the method, URL, status
//! and raw body:
//!
//! ```no_run
//! use restkeep::{translate_failure, Error, ProxyConfig, Request, TransportClient};
//!
//! # async fn example() -> Result<(), Error> {
//! # let client = TransportClient::builder().proxy(ProxyConfig::none()).build()?;
//! let response = client.execute(Request::get("https://api.example.com/items")?).await?;
//! if response.is_status_code_error() {
//!     match translate_failure(response).await {
//!         Error::Api(api) => eprintln!("{} (code {:?})", api.message(), api.code()),
//!         Error::HttpError { status, raw_response, .. } => {
//!             eprintln!("HTTP error {:?}: {}", status, raw_response)
//!         }
//!         other => eprintln!("Other error: {}", other),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod body;
mod client;
mod config;
mod error;
mod headers;
pub mod proxy;
pub mod reconcile;
mod request;
mod response;
mod translate;

pub use auth::{
    AuthenticatingClient, Authenticator, ConnectionResult, TokenAuthenticator,
    UnauthorizedPolicy, MAX_AUTHENTICATION_RETRIES,
};
pub use body::{BodyContent, Entity, EntityBuilder, EntityConverter, JsonSource, MultipartPart};
pub use client::{ClientBuilder, Conditional, Execute, TransportClient, DEFAULT_ACCEPT, DEFAULT_TIMEOUT};
pub use config::TransportSettings;
pub use error::{Error, Result};
pub use headers::CommonHeaders;
pub use proxy::{AuthScope, CredentialStore, ProxyConfig, ProxyCredentials};
pub use reconcile::{
    JsonReconciler, Patch, PatchError, PatchOperation, Reconciled, Replay, SkippedOperation,
};
pub use request::{Request, RequestBuilder, DEFAULT_CHARSET};
pub use response::{is_error_status, is_success_status, Response};
pub use translate::{translate_failure, ApiError};
