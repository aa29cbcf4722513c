//! Authentication and the bounded re-authentication protocol.
//!
//! An [`AuthenticatingClient`] wraps a [`TransportClient`] with an
//! [`Authenticator`]. Before each call it makes sure credentials are in
//! place; when the server answers "unauthorized" it drops the stale
//! credential and authenticates again, at most [`MAX_AUTHENTICATION_RETRIES`]
//! times per call.

use crate::body::BodyContent;
use crate::client::{Execute, TransportClient};
use crate::headers::CommonHeaders;
use crate::request::Request;
use crate::response::Response;
use crate::translate::translate_failure;
use crate::{Error, Result};
use http::header::{ACCEPT, AUTHORIZATION};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use url::Url;

/// How many times one call may re-authenticate after an unauthorized answer.
///
/// A call therefore executes and authenticates at most three times.
pub const MAX_AUTHENTICATION_RETRIES: usize = 2;

/// Establishes credentials for an [`AuthenticatingClient`].
///
/// # Examples
///
/// ```no_run
/// use restkeep::{Authenticator, CommonHeaders, Request, Response, TransportClient};
/// use http::HeaderValue;
/// use std::future::Future;
///
/// struct StaticKey(&'static str);
///
/// impl Authenticator for StaticKey {
///     fn attempt_authentication(
///         &self,
///         transport: &TransportClient,
///     ) -> impl Future<Output = restkeep::Result<Response>> + Send {
///         let probe = Request::get("https://api.example.com/session");
///         let transport = transport.clone();
///         async move { transport.execute(probe?).await }
///     }
///
///     fn complete_authentication_request(
///         &self,
///         request: Request,
///         response: Response,
///         common_headers: &CommonHeaders,
///     ) -> impl Future<Output = restkeep::Result<Request>> + Send {
///         response.close();
///         common_headers.insert(
///             http::header::AUTHORIZATION,
///             HeaderValue::from_static(self.0),
///         );
///         async move { Ok(request) }
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync {
    /// The header that carries the credential. Stripped on unauthorized retries.
    fn credential_header(&self) -> HeaderName {
        AUTHORIZATION
    }

    /// Whether the outbound headers already carry a credential. Must not do I/O.
    fn is_already_authenticated(&self, headers: &HeaderMap) -> bool {
        headers.contains_key(self.credential_header())
    }

    /// Performs the side-channel call that establishes credentials.
    fn attempt_authentication(
        &self,
        transport: &TransportClient,
    ) -> impl Future<Output = Result<Response>> + Send;

    /// Applies a successful authentication response to the pending request
    /// and/or the client's common headers. Owns closing `response`.
    fn complete_authentication_request(
        &self,
        request: Request,
        response: Response,
        common_headers: &CommonHeaders,
    ) -> impl Future<Output = Result<Request>> + Send;
}

/// Which statuses count as "unauthorized" and trigger re-authentication.
///
/// A missing status and `401` always do. `403` only does when
/// `retry_forbidden` is set, for servers that answer an expired CSRF token
/// with it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnauthorizedPolicy {
    pub retry_forbidden: bool,
}

impl UnauthorizedPolicy {
    pub fn retrying_forbidden() -> Self {
        Self {
            retry_forbidden: true,
        }
    }

    pub fn is_unauthorized(&self, status: Option<StatusCode>) -> bool {
        match status {
            None => true,
            Some(StatusCode::UNAUTHORIZED) => true,
            Some(StatusCode::FORBIDDEN) => self.retry_forbidden,
            Some(_) => false,
        }
    }
}

/// The outcome of [`AuthenticatingClient::attempt_connection`].
#[derive(Debug)]
pub enum ConnectionResult {
    Success {
        status: u16,
    },
    Failure {
        /// `None` when no status was received.
        status: Option<u16>,
        message: String,
        error: Option<Error>,
    },
}

impl ConnectionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ConnectionResult::Success { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ConnectionResult::Success { status } => Some(*status),
            ConnectionResult::Failure { status, .. } => *status,
        }
    }
}

/// A [`TransportClient`] that authenticates before executing and
/// re-authenticates when credentials turn out to be stale.
///
/// Clones of the underlying transport share its common headers, so a
/// credential established for one request is reused by the next.
pub struct AuthenticatingClient<A> {
    transport: TransportClient,
    authenticator: A,
    policy: UnauthorizedPolicy,
}

impl<A: Authenticator> AuthenticatingClient<A> {
    pub fn new(transport: TransportClient, authenticator: A) -> Self {
        Self {
            transport,
            authenticator,
            policy: UnauthorizedPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: UnauthorizedPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn transport(&self) -> &TransportClient {
        &self.transport
    }

    pub fn authenticator(&self) -> &A {
        &self.authenticator
    }

    pub fn policy(&self) -> UnauthorizedPolicy {
        self.policy
    }

    /// Executes `request`, authenticating first when needed.
    ///
    /// An unauthorized answer (per the [`UnauthorizedPolicy`]) strips the
    /// credential that was sent and starts over, up to
    /// [`MAX_AUTHENTICATION_RETRIES`] times. Any other response is returned
    /// as is.
    ///
    /// # Errors
    ///
    /// - Transport failures ([`Error::Network`], [`Error::Timeout`]) are
    ///   returned at once; the server may already have processed the call.
    /// - [`Error::Authentication`] if authenticating fails; never retried.
    /// - [`Error::UnauthorizedExhausted`] with the translated last failure
    ///   once the retries are spent.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        let header = self.authenticator.credential_header();
        let mut request = request;
        let mut retries = 0;

        loop {
            request = self.ensure_authenticated(request).await?;
            let sent = self
                .transport
                .outbound_headers(&request)
                .get(&header)
                .cloned();

            let response = self.transport.execute(request.clone()).await?;
            let status = response.status();
            if !self.policy.is_unauthorized(status) {
                return Ok(response);
            }

            if retries < MAX_AUTHENTICATION_RETRIES {
                retries += 1;
                tracing::warn!(
                    status = ?status,
                    retry = retries,
                    url = %request.url(),
                    "Unauthorized, re-authenticating"
                );
                if let Some(stale) = &sent {
                    self.transport
                        .common_headers()
                        .remove_if_matches(&header, stale);
                }
                request = request.without_header(&header);
                response.close();
                continue;
            }

            let last_error = translate_failure(response).await;
            tracing::error!(
                attempts = retries + 1,
                url = %request.url(),
                "Still unauthorized after re-authenticating"
            );
            return Err(Error::UnauthorizedExhausted {
                attempts: retries + 1,
                last_error: Box::new(last_error),
            });
        }
    }

    async fn ensure_authenticated(&self, request: Request) -> Result<Request> {
        let outbound = self.transport.outbound_headers(&request);
        if self.authenticator.is_already_authenticated(&outbound) {
            return Ok(request);
        }

        tracing::debug!(url = %request.url(), "Authenticating");
        let response = self
            .authenticator
            .attempt_authentication(&self.transport)
            .await
            .map_err(Error::authentication)?;
        if !response.is_status_code_success() {
            return Err(Error::authentication(translate_failure(response).await));
        }

        self.authenticator
            .complete_authentication_request(request, response, self.transport.common_headers())
            .await
            .map_err(Error::authentication)
    }

    /// Authenticates once and reports the outcome without failing.
    ///
    /// For health checks that must not propagate errors.
    pub async fn attempt_connection(&self) -> ConnectionResult {
        match self.authenticator.attempt_authentication(&self.transport).await {
            Ok(response) if response.is_status_code_success() => {
                let status = response.status_code().unwrap_or_default();
                response.close();
                ConnectionResult::Success { status }
            }
            Ok(response) => {
                let status = response.status_code();
                let error = translate_failure(response).await;
                ConnectionResult::Failure {
                    status,
                    message: error.to_string(),
                    error: Some(error),
                }
            }
            Err(e) => ConnectionResult::Failure {
                status: e.status().map(|status| status.as_u16()),
                message: e.to_string(),
                error: Some(e),
            },
        }
    }
}

impl<A: Authenticator> Execute for AuthenticatingClient<A> {
    fn execute(&self, request: Request) -> impl Future<Output = Result<Response>> + Send {
        AuthenticatingClient::execute(self, request)
    }
}

/// Authenticates by posting a form to a token endpoint and sending the
/// returned token on every later request.
///
/// # Examples
///
/// ```
/// use restkeep::TokenAuthenticator;
///
/// # fn example() -> Result<(), restkeep::Error> {
/// let authenticator = TokenAuthenticator::new("https://auth.example.com/oauth/token")?
///     .field("grant_type", "client_credentials")
///     .field("client_id", "inventory-sync")
///     .secret_field("client_secret", "s3cr3t");
/// # let _ = authenticator;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TokenAuthenticator {
    token_url: Url,
    fields: BTreeMap<String, String>,
    secret_fields: BTreeMap<String, SecretString>,
    token_pointer: String,
    scheme: String,
    header: HeaderName,
}

impl TokenAuthenticator {
    pub fn new(token_url: impl AsRef<str>) -> Result<Self> {
        Ok(Self {
            token_url: Url::parse(token_url.as_ref())?,
            fields: BTreeMap::new(),
            secret_fields: BTreeMap::new(),
            token_pointer: "/access_token".to_string(),
            scheme: "Bearer".to_string(),
            header: AUTHORIZATION,
        })
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// A form field whose value is kept out of logs and `Debug` output.
    pub fn secret_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secret_fields
            .insert(name.into(), SecretString::from(value.into()));
        self
    }

    /// JSON pointer to the token in the endpoint's answer. Defaults to `/access_token`.
    pub fn token_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.token_pointer = pointer.into();
        self
    }

    /// Prefix of the header value. Defaults to `Bearer`; empty sends the bare token.
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn header(mut self, header: HeaderName) -> Self {
        self.header = header;
        self
    }

    fn token_request(&self) -> Result<Request> {
        let form = self
            .fields
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .chain(
                self.secret_fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.expose_secret().to_string())),
            )
            .collect();

        Request::builder()
            .method(Method::POST)
            .parsed_url(self.token_url.clone())
            .header(ACCEPT.as_str(), "application/json")?
            .body(BodyContent::form(form))
            .build()
    }

    fn credential_value(&self, token: &str) -> Result<HeaderValue> {
        let raw = if self.scheme.is_empty() {
            token.to_string()
        } else {
            format!("{} {}", self.scheme, token)
        };
        let mut value = HeaderValue::try_from(raw)
            .map_err(|e| Error::InvalidRequest(format!("Token is not a valid header value: {}", e)))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl Authenticator for TokenAuthenticator {
    fn credential_header(&self) -> HeaderName {
        self.header.clone()
    }

    fn attempt_authentication(
        &self,
        transport: &TransportClient,
    ) -> impl Future<Output = Result<Response>> + Send {
        let request = self.token_request();
        async move { transport.execute(request?).await }
    }

    fn complete_authentication_request(
        &self,
        request: Request,
        mut response: Response,
        common_headers: &CommonHeaders,
    ) -> impl Future<Output = Result<Request>> + Send {
        async move {
            let status = response.status().unwrap_or_default();
            let raw = response.text().await?;
            response.close();

            let token = serde_json::from_str::<Value>(&raw)
                .ok()
                .and_then(|document| {
                    document
                        .pointer(&self.token_pointer)
                        .and_then(Value::as_str)
                        .filter(|token| !token.is_empty())
                        .map(str::to_string)
                })
                .ok_or_else(|| Error::DeserializationFailed {
                    raw_response: raw.clone(),
                    serde_error: format!("no token at {}", self.token_pointer),
                    status,
                })?;

            common_headers.insert(self.header.clone(), self.credential_value(&token)?);
            tracing::debug!(header = %self.header, "Stored authentication token");
            Ok(request)
        }
    }
}
