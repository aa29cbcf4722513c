//! One completed HTTP exchange.
//!
//! A [`Response`] owns the connection resources of its exchange. The body can
//! be read once; dropping or [`close`](Response::close)-ing the response
//! releases the body and the connection on every exit path.

use crate::request::Request;
use crate::{Error, Result};
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Returns `true` for status codes in `200..=299`.
pub fn is_success_status(status: Option<StatusCode>) -> bool {
    status.is_some_and(|status| status.is_success())
}

/// Returns `true` for status codes `>= 400` and for exchanges that produced
/// no status at all.
pub fn is_error_status(status: Option<StatusCode>) -> bool {
    status.map_or(true, |status| status.as_u16() >= 400)
}

#[derive(Debug)]
enum Body {
    Wire(reqwest::Response),
    Buffered(Bytes),
    Consumed,
}

/// A completed exchange: the originating request, status, headers and a
/// body that can be consumed exactly once.
///
/// # Examples
///
/// ```no_run
/// use restkeep::{ProxyConfig, Request, TransportClient};
///
/// # async fn example() -> Result<(), restkeep::Error> {
/// let client = TransportClient::builder().proxy(ProxyConfig::none()).build()?;
/// let mut response = client.execute(Request::get("https://api.example.com/items")?).await?;
///
/// if response.is_status_code_success() {
///     let items: Vec<serde_json::Value> = response.json().await?;
///     println!("{} items in {:?}", items.len(), response.latency());
/// }
/// response.close();
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Response {
    request: Request,
    status: Option<StatusCode>,
    status_message: String,
    headers: HeaderMap,
    latency: Duration,
    body: Body,
}

impl Response {
    pub(crate) fn from_wire(request: Request, response: reqwest::Response, latency: Duration) -> Self {
        let status = response.status();
        Self {
            request,
            status: Some(status),
            status_message: status.canonical_reason().unwrap_or_default().to_string(),
            headers: response.headers().clone(),
            latency,
            body: Body::Wire(response),
        }
    }

    /// Builds a response from already-buffered parts.
    ///
    /// Used by authenticators that answer without a network call and by test
    /// doubles.
    pub fn from_parts(
        request: Request,
        status: Option<StatusCode>,
        headers: HeaderMap,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            request,
            status,
            status_message: status
                .and_then(|status| status.canonical_reason())
                .unwrap_or_default()
                .to_string(),
            headers,
            latency: Duration::ZERO,
            body: Body::Buffered(body.into()),
        }
    }

    /// The request that produced this response.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The status, `None` when the exchange produced none.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status.map(|status| status.as_u16())
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns a header value by name, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// Time from dispatch until the response head arrived.
    pub fn latency(&self) -> Duration {
        self.latency
    }

    pub fn is_status_code_success(&self) -> bool {
        is_success_status(self.status)
    }

    pub fn is_status_code_error(&self) -> bool {
        is_error_status(self.status)
    }

    /// Returns `true` once the body has been read.
    pub fn is_consumed(&self) -> bool {
        matches!(self.body, Body::Consumed)
    }

    /// Reads the whole body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BodyConsumed`] on a second read, or a network error
    /// if the connection fails mid-read.
    pub async fn bytes(&mut self) -> Result<Bytes> {
        match std::mem::replace(&mut self.body, Body::Consumed) {
            Body::Wire(response) => response.bytes().await.map_err(|e| {
                Error::network(self.request.method().clone(), self.request.full_url(), e)
            }),
            Body::Buffered(bytes) => Ok(bytes),
            Body::Consumed => Err(Error::BodyConsumed),
        }
    }

    /// Reads the whole body as text, replacing invalid UTF-8.
    pub async fn text(&mut self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Reads the body and deserializes it as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeserializationFailed`] with the raw body when the
    /// JSON does not match `T`.
    pub async fn json<T: DeserializeOwned>(&mut self) -> Result<T> {
        let raw = self.text().await?;
        serde_json::from_str(&raw).map_err(|e| {
            tracing::error!(
                error = %e,
                raw_response = %raw,
                "Failed to deserialize response"
            );
            Error::DeserializationFailed {
                raw_response: raw.clone(),
                serde_error: e.to_string(),
                status: self.status.unwrap_or_default(),
            }
        })
    }

    /// Releases the body and the connection behind it.
    pub fn close(self) {
        tracing::trace!(
            method = %self.request.method(),
            url = %self.request.url(),
            consumed = self.is_consumed(),
            "Releasing response"
        );
    }
}
