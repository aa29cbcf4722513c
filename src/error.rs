//! Error types for transport, authentication and reconciliation failures.
//!
//! Every error that originates from an HTTP exchange keeps enough context
//! (method, URL, status, raw body) to diagnose the failure without issuing
//! the call again.

use crate::translate::ApiError;
use http::{HeaderMap, Method, StatusCode};
use url::Url;

/// The main error type for this crate.
///
/// # Examples
///
/// ```no_run
/// use restkeep::{Error, ProxyConfig, Request, TransportClient};
///
/// # async fn example() -> Result<(), Error> {
/// let client = TransportClient::builder().proxy(ProxyConfig::none()).build()?;
/// let request = Request::get("https://api.example.com/items")?;
///
/// match client.execute(request).await {
///     Ok(response) if response.is_status_code_success() => println!("ok"),
///     Ok(response) => println!("server said {:?}", response.status()),
///     Err(Error::Network { url, .. }) => eprintln!("could not reach {url}"),
///     Err(e) => eprintln!("other error: {e}"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Invalid construction arguments for a client, proxy or authenticator.
    ///
    /// Raised synchronously by the builders, never deferred to the first call.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The request description is structurally invalid (missing method or URL,
    /// malformed header).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// An invalid URL was provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A network-level failure: connection refused, DNS, TLS negotiation.
    #[error("Network error for {method} {url}: {source}")]
    Network {
        /// Method of the failed call
        method: Method,
        /// Full URL of the failed call, query included
        url: Url,
        /// The underlying transport error
        #[source]
        source: reqwest::Error,
    },

    /// The transport-level timeout elapsed.
    #[error("Request timed out: {method} {url}")]
    Timeout {
        /// Method of the failed call
        method: Method,
        /// Full URL of the failed call, query included
        url: Url,
    },

    /// Reading a file-backed body failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The response body was read a second time.
    #[error("Response body was already consumed")]
    BodyConsumed,

    /// Failed to serialize a request body or a typed object to JSON.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),

    /// Failed to deserialize the response body into the expected type.
    #[error("Failed to deserialize response (status {status}): {serde_error}")]
    DeserializationFailed {
        /// The raw response body that failed to deserialize
        raw_response: String,
        /// The serde error message
        serde_error: String,
        /// The HTTP status code
        status: StatusCode,
    },

    /// The server answered with a failed status and no structured error body.
    #[error("HTTP error {} {status_message} ({method} {url})", status_label(.status))]
    HttpError {
        /// Method of the failed call
        method: Method,
        /// Full URL of the failed call
        url: Url,
        /// The status code, `None` when the exchange produced no status
        status: Option<StatusCode>,
        /// The status reason phrase
        status_message: String,
        /// The raw response body
        raw_response: String,
        /// The response headers
        headers: HeaderMap,
    },

    /// A structured server-reported failure (`errorMessage` / `errorCode`).
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The authentication side-channel itself failed. Never retried.
    #[error("Authentication failed: {source}")]
    Authentication {
        /// What went wrong while authenticating
        #[source]
        source: Box<Error>,
    },

    /// Still unauthorized after the fixed re-authentication bound was spent.
    #[error("Still unauthorized after {attempts} attempts: {last_error}")]
    UnauthorizedExhausted {
        /// The number of executions made
        attempts: usize,
        /// The translated error of the last unauthorized exchange
        last_error: Box<Error>,
    },

    /// A patch could not be computed or the reconciled document not produced.
    #[error("Reconciliation failed: {0}")]
    Reconciliation(String),
}

fn status_label(status: &Option<StatusCode>) -> String {
    match status {
        Some(status) => status.as_u16().to_string(),
        None => "(no status)".to_string(),
    }
}

impl Error {
    /// Maps a `reqwest` failure for the given call into `Network` or `Timeout`.
    pub(crate) fn network(method: Method, url: Url, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Error::Timeout { method, url }
        } else {
            Error::Network {
                method,
                url,
                source,
            }
        }
    }

    pub(crate) fn authentication(source: Error) -> Self {
        Error::Authentication {
            source: Box::new(source),
        }
    }

    /// Returns `true` for failures at the network layer (no status received).
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Network { .. } | Error::Timeout { .. })
    }

    /// Returns `true` if the error carries a `401 Unauthorized` status.
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }

    /// Returns the HTTP status code if this error has one.
    ///
    /// Wrapping variants (`Api`, `Authentication`, `UnauthorizedExhausted`)
    /// report the status of the failure they wrap.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::HttpError { status, .. } => *status,
            Error::DeserializationFailed { status, .. } => Some(*status),
            Error::Api(api) => api.status(),
            Error::Authentication { source } => source.status(),
            Error::UnauthorizedExhausted { last_error, .. } => last_error.status(),
            _ => None,
        }
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::HttpError { raw_response, .. } => Some(raw_response),
            Error::DeserializationFailed { raw_response, .. } => Some(raw_response),
            Error::Api(api) => api.failure().raw_response(),
            Error::Authentication { source } => source.raw_response(),
            Error::UnauthorizedExhausted { last_error, .. } => last_error.raw_response(),
            _ => None,
        }
    }
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
