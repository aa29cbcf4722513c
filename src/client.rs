//! HTTP transport with TLS trust, proxy routing and client-wide headers.
//!
//! The [`TransportClient`] type turns a [`Request`] into one network exchange.
//! Use [`ClientBuilder`] to configure and create clients. Anything that can
//! execute requests implements [`Execute`], which also provides conditional
//! GET and typed JSON helpers on top of plain execution.

use crate::body::{strip_part_content_types, BodyContent, Entity, EntityConverter, MultipartPart};
use crate::headers::{overlay, parse_header, CommonHeaders, Redacted};
use crate::proxy::{CredentialStore, ProxyConfig};
use crate::reconcile::Reconciled;
use crate::request::Request;
use crate::response::Response;
use crate::translate::translate_failure;
use crate::{Error, Result};
use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE, LAST_MODIFIED, PROXY_AUTHORIZATION};
use http::{HeaderMap, HeaderValue, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Timeout applied when the builder is not given one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// `Accept` value sent on GET requests that do not choose their own.
pub const DEFAULT_ACCEPT: &str = "application/json";

/// The outcome of [`Execute::execute_if_modified_since`].
#[derive(Debug)]
pub enum Conditional {
    /// The probe's `Last-Modified` matched; no GET was issued.
    Unchanged,
    /// The resource changed (or the probe could not tell); the GET response.
    Modified(Response),
}

impl Conditional {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Conditional::Unchanged)
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            Conditional::Unchanged => None,
            Conditional::Modified(response) => Some(response),
        }
    }
}

/// Something that can execute a [`Request`].
///
/// Implemented by [`TransportClient`] and
/// [`AuthenticatingClient`](crate::AuthenticatingClient); the provided
/// methods work the same on both.
pub trait Execute: Send + Sync {
    /// Performs one exchange and returns its response, successful or not.
    fn execute(&self, request: Request) -> impl Future<Output = Result<Response>> + Send;

    /// Issues a HEAD probe and only performs the GET if the resource's
    /// `Last-Modified` differs from `since`.
    ///
    /// A missing `Last-Modified` counts as the Unix epoch. Timestamps are
    /// compared at whole-second resolution, the resolution of the header.
    ///
    /// # Errors
    ///
    /// A failed probe (transport error or error status) is returned as an
    /// error rather than being read as "unchanged".
    fn execute_if_modified_since(
        &self,
        request: Request,
        since: SystemTime,
    ) -> impl Future<Output = Result<Conditional>> + Send {
        async move {
            let probe = request
                .to_builder()
                .method(Method::HEAD)
                .clear_body()
                .build()?;
            let response = self.execute(probe).await?;
            if !response.is_status_code_success() {
                return Err(translate_failure(response).await);
            }
            let last_modified = last_modified(response.headers());
            response.close();

            if last_modified.is_some_and(|modified| same_second(modified, since)) {
                tracing::debug!(url = %request.full_url(), "Resource unchanged, skipping GET");
                return Ok(Conditional::Unchanged);
            }

            let get = request.to_builder().method(Method::GET).build()?;
            self.execute(get).await.map(Conditional::Modified)
        }
    }

    /// Executes `request` and deserializes a successful JSON body.
    ///
    /// Failed statuses are translated with
    /// [`translate_failure`](crate::translate_failure).
    fn fetch_json<T>(&self, request: Request) -> impl Future<Output = Result<T>> + Send
    where
        T: DeserializeOwned + Send,
    {
        async move {
            let mut response = self.execute(request).await?;
            if !response.is_status_code_success() {
                return Err(translate_failure(response).await);
            }
            let value = response.json().await;
            response.close();
            value
        }
    }

    /// Executes `request` and keeps the body as a [`Reconciled`] value, so
    /// the JSON can be sent back without losing undeclared fields.
    fn fetch_reconciled<T>(&self, request: Request) -> impl Future<Output = Result<Reconciled<T>>> + Send
    where
        T: DeserializeOwned + Serialize + Send,
    {
        async move {
            let mut response = self.execute(request).await?;
            if !response.is_status_code_success() {
                return Err(translate_failure(response).await);
            }
            let status = response.status().unwrap_or_default();
            let raw = response.text().await?;
            response.close();

            let value: T = serde_json::from_str(&raw).map_err(|e| Error::DeserializationFailed {
                raw_response: raw.clone(),
                serde_error: e.to_string(),
                status,
            })?;
            Reconciled::new(value, &raw)
        }
    }
}

/// Reads `Last-Modified`. Absent means the epoch; unparsable means unknown.
fn last_modified(headers: &HeaderMap) -> Option<SystemTime> {
    let Some(value) = headers.get(LAST_MODIFIED) else {
        return Some(UNIX_EPOCH);
    };
    let parsed = value
        .to_str()
        .ok()
        .and_then(|text| httpdate::parse_http_date(text).ok());
    if parsed.is_none() {
        tracing::debug!(last_modified = ?value, "Unparsable Last-Modified header");
    }
    parsed
}

fn same_second(left: SystemTime, right: SystemTime) -> bool {
    let seconds = |time: SystemTime| time.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs());
    matches!((seconds(left), seconds(right)), (Some(l), Some(r)) if l == r)
}

/// An HTTP client that executes [`Request`]s.
///
/// The client is cheap to clone and designed to be shared; clones share the
/// connection pool, the common headers and the credential store.
///
/// # Examples
///
/// ```no_run
/// use restkeep::{ProxyConfig, Request, TransportClient};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), restkeep::Error> {
/// let client = TransportClient::builder()
///     .timeout(Duration::from_secs(20))
///     .proxy(ProxyConfig::none())
///     .common_header("User-Agent", "inventory-sync/1.0")?
///     .build()?;
///
/// let mut response = client
///     .execute(Request::get("https://api.example.com/items")?)
///     .await?;
/// println!("{:?}: {}", response.status(), response.text().await?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TransportClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http_client: reqwest::Client,
    proxy: ProxyConfig,
    credential_store: Arc<CredentialStore>,
    common_headers: CommonHeaders,
    default_accept: HeaderValue,
    timeout: Duration,
    trust_all_certificates: bool,
    verbose: bool,
}

impl TransportClient {
    /// Creates a new `ClientBuilder` for configuring a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Headers sent with every request of this client.
    pub fn common_headers(&self) -> &CommonHeaders {
        &self.inner.common_headers
    }

    pub fn credential_store(&self) -> &Arc<CredentialStore> {
        &self.inner.credential_store
    }

    pub fn proxy(&self) -> &ProxyConfig {
        &self.inner.proxy
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    pub fn trusts_all_certificates(&self) -> bool {
        self.inner.trust_all_certificates
    }

    /// The headers `request` would be sent with, body headers aside.
    ///
    /// Request headers win over common headers. GET requests without any
    /// `Accept` get the default one.
    pub fn outbound_headers(&self, request: &Request) -> HeaderMap {
        let mut headers = self.inner.common_headers.snapshot();
        overlay(&mut headers, request.headers());

        if *request.method() == Method::GET && !headers.contains_key(ACCEPT) {
            headers.insert(ACCEPT, self.inner.default_accept.clone());
        }
        if !headers.contains_key(PROXY_AUTHORIZATION) {
            if let Some(value) = self.proxy_authorization(request) {
                headers.insert(PROXY_AUTHORIZATION, value);
            }
        }
        headers
    }

    /// Proxy credentials for plain-HTTP targets routed through the proxy.
    ///
    /// HTTPS targets are tunnelled; their proxy credentials are set on the
    /// tunnel when the client is built and never reach the origin.
    fn proxy_authorization(&self, request: &Request) -> Option<HeaderValue> {
        let proxy = &self.inner.proxy;
        if proxy.is_none() || request.url().scheme() != "http" {
            return None;
        }
        let credentials = self.inner.credential_store.credentials(&proxy.scope())?;
        match credentials.authorization_value() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unusable proxy credentials");
                None
            }
        }
    }

    /// Executes a single request.
    ///
    /// Opens one network exchange. The returned response may carry any
    /// status; interpreting it is up to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] or [`Error::Timeout`] when the exchange
    /// fails, and body preparation errors (file I/O, serialization).
    pub async fn execute(&self, request: Request) -> Result<Response> {
        let method = request.method().clone();
        let url = request.full_url();
        let mut headers = self.outbound_headers(&request);

        tracing::debug!(
            method = %method,
            url = %url,
            body = request.body().map_or("none", BodyContent::kind),
            "Executing HTTP request"
        );

        let wire_body = match request.body() {
            Some(body) => Some(body.create_entity(request.charset(), &WireConverter).await?),
            None => None,
        };
        match &wire_body {
            Some(WireBody::Bytes {
                content_type: Some(content_type),
                ..
            }) if !headers.contains_key(CONTENT_TYPE) => {
                let value = HeaderValue::try_from(content_type.as_str()).map_err(|e| {
                    Error::InvalidRequest(format!("Invalid content type: {}", e))
                })?;
                headers.insert(CONTENT_TYPE, value);
            }
            Some(WireBody::Multipart(_)) => {
                // The multipart writer sets the type together with its boundary.
                headers.remove(CONTENT_TYPE);
            }
            _ => {}
        }

        if self.inner.verbose {
            tracing::trace!(headers = %Redacted(&headers), "Request headers");
        }

        let mut builder = self
            .inner
            .http_client
            .request(method.clone(), url.clone())
            .headers(headers);
        builder = match wire_body {
            Some(WireBody::Bytes { data, .. }) => builder.body(data),
            Some(WireBody::Multipart(form)) => builder.multipart(form),
            None => builder,
        };

        let start_time = Instant::now();
        let response = builder.send().await.map_err(|e| {
            tracing::warn!(
                error = %e,
                method = %method,
                url = %url,
                "Request failed"
            );
            Error::network(method.clone(), url.clone(), e)
        })?;
        let latency = start_time.elapsed();

        tracing::info!(
            method = %method,
            url = %url,
            status = response.status().as_u16(),
            latency_ms = latency.as_millis(),
            "Received HTTP response"
        );
        if self.inner.verbose {
            tracing::trace!(headers = %Redacted(response.headers()), "Response headers");
        }

        Ok(Response::from_wire(request, response, latency))
    }
}

impl Execute for TransportClient {
    fn execute(&self, request: Request) -> impl Future<Output = Result<Response>> + Send {
        TransportClient::execute(self, request)
    }
}

enum WireBody {
    Bytes {
        data: Bytes,
        content_type: Option<String>,
    },
    Multipart(reqwest::multipart::Form),
}

/// Converts body content into `reqwest` bodies.
struct WireConverter;

impl EntityConverter for WireConverter {
    type Output = WireBody;

    fn bytes(&self, data: Bytes, content_type: Option<&str>) -> Result<WireBody> {
        Ok(WireBody::Bytes {
            data,
            content_type: content_type.map(str::to_string),
        })
    }

    fn multipart(&self, parts: Vec<MultipartPart>) -> Result<WireBody> {
        // Parts are written without mime types, so the form emits no
        // per-part Content-Type header.
        let form = strip_part_content_types(parts).into_iter().fold(
            reqwest::multipart::Form::new(),
            |form, part| {
                let mut wire_part = reqwest::multipart::Part::bytes(part.data.to_vec());
                if let Some(file_name) = part.file_name {
                    wire_part = wire_part.file_name(file_name);
                }
                form.part(part.name, wire_part)
            },
        );
        Ok(WireBody::Multipart(form))
    }

    fn passthrough(&self, entity: &Entity) -> Result<WireBody> {
        match entity {
            Entity::Bytes { data, content_type } => self.bytes(data.clone(), content_type.as_deref()),
            Entity::Multipart(parts) => self.multipart(parts.clone()),
        }
    }
}

/// Builder for configuring and creating a [`TransportClient`].
///
/// A proxy descriptor is mandatory: pass [`ProxyConfig::none()`] for direct
/// connections.
///
/// # Examples
///
/// ```no_run
/// use restkeep::{ClientBuilder, ProxyConfig, ProxyCredentials};
/// use std::time::Duration;
///
/// # fn example() -> Result<(), restkeep::Error> {
/// let client = ClientBuilder::new()
///     .timeout(Duration::from_secs(10))
///     .proxy(
///         ProxyConfig::new("proxy.corp.local", 3128)
///             .with_credentials(ProxyCredentials::basic("svc-sync", "hunter2")),
///     )
///     .verbose(true)
///     .build()?;
/// # let _ = client;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    timeout: Duration,
    trust_all_certificates: bool,
    proxy: Option<ProxyConfig>,
    credential_store: Option<Arc<CredentialStore>>,
    common_headers: HeaderMap,
    default_accept: HeaderValue,
    verbose: bool,
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with default settings and no proxy
    /// descriptor.
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            trust_all_certificates: false,
            proxy: None,
            credential_store: None,
            common_headers: HeaderMap::new(),
            default_accept: HeaderValue::from_static(DEFAULT_ACCEPT),
            verbose: false,
        }
    }

    /// Sets the connect and request timeout. Must be greater than zero.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout_secs(self, seconds: u64) -> Self {
        self.timeout(Duration::from_secs(seconds))
    }

    /// Accepts any server certificate. For development only.
    pub fn trust_all_certificates(mut self, trust_all: bool) -> Self {
        self.trust_all_certificates = trust_all;
        self
    }

    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Shares an existing credential store with this client.
    pub fn credential_store(mut self, store: Arc<CredentialStore>) -> Self {
        self.credential_store = Some(store);
        self
    }

    /// Adds a header that will be included in all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn common_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let (name, value) = parse_header(name.as_ref(), value.as_ref())
            .map_err(|e| Error::Configuration(e.to_string()))?;
        self.common_headers.insert(name, value);
        Ok(self)
    }

    /// Sets the `Accept` value used for GET requests without one.
    pub fn default_accept(mut self, value: impl AsRef<str>) -> Result<Self> {
        self.default_accept = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header value: {}", e)))?;
        Ok(self)
    }

    /// Logs request and response headers at trace level.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Builds the configured `TransportClient`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for a zero timeout, a missing or
    /// malformed proxy descriptor, or a TLS backend that fails to start.
    pub fn build(self) -> Result<TransportClient> {
        if self.timeout.is_zero() {
            return Err(Error::Configuration(
                "Timeout must be greater than zero".to_string(),
            ));
        }
        let proxy = self.proxy.ok_or_else(|| {
            Error::Configuration(
                "Proxy configuration is required; use ProxyConfig::none() for direct connections"
                    .to_string(),
            )
        })?;
        proxy.validate()?;

        let credential_store = self.credential_store.unwrap_or_default();
        if let Some(credentials) = &proxy.credentials {
            credential_store.set_credentials(proxy.scope(), credentials.clone());
        }

        let mut http_builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout);

        if self.trust_all_certificates {
            tracing::warn!("TLS certificate verification is disabled for this client");
            http_builder = http_builder.danger_accept_invalid_certs(true);
        }

        if proxy.is_none() {
            http_builder = http_builder.no_proxy();
        } else {
            let mut wire_proxy = reqwest::Proxy::all(proxy.url()?)
                .map_err(|e| Error::Configuration(format!("Invalid proxy: {}", e)))?;
            if let Some(credentials) = &proxy.credentials {
                wire_proxy = wire_proxy.basic_auth(&credentials.principal(), credentials.password());
            }
            http_builder = http_builder.proxy(wire_proxy);
        }

        let http_client = http_builder.build().map_err(|e| {
            Error::Configuration(format!("Failed to build HTTP client: {}", e))
        })?;

        tracing::debug!(
            timeout_secs = self.timeout.as_secs(),
            proxy_host = %proxy.host,
            proxy_port = proxy.port,
            trust_all_certificates = self.trust_all_certificates,
            "Built transport client"
        );

        Ok(TransportClient {
            inner: Arc::new(ClientInner {
                http_client,
                proxy,
                credential_store,
                common_headers: CommonHeaders::from_map(self.common_headers),
                default_accept: self.default_accept,
                timeout: self.timeout,
                trust_all_certificates: self.trust_all_certificates,
                verbose: self.verbose,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
