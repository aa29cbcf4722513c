//! Declarative, immutable descriptions of a single HTTP call.

use crate::body::BodyContent;
use crate::headers::parse_header;
use crate::{Error, Result};
use http::{HeaderMap, HeaderName, Method};
use std::collections::{BTreeMap, BTreeSet};
use url::Url;

/// Charset used to encode text bodies unless the request says otherwise.
pub const DEFAULT_CHARSET: &str = "UTF-8";

/// One HTTP call: URL, method, headers, query parameters and an optional body.
///
/// A `Request` is never modified after it is built. Derive a changed copy
/// with [`Request::to_builder`].
///
/// # Examples
///
/// ```
/// use restkeep::{BodyContent, Request};
/// use http::Method;
///
/// # fn example() -> Result<(), restkeep::Error> {
/// let request = Request::builder()
///     .method(Method::POST)
///     .url("https://api.example.com/items")?
///     .query_param("dry_run", "true")
///     .header("X-Trace", "abc")?
///     .body(BodyContent::object(serde_json::json!({ "name": "widget" })))
///     .build()?;
///
/// let retry = request.to_builder().query_param("attempt", "2").build()?;
/// assert_eq!(retry.full_url().query(), Some("attempt=2&dry_run=true"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    url: Url,
    method: Method,
    charset: String,
    query: BTreeMap<String, BTreeSet<String>>,
    headers: HeaderMap,
    body: Option<BodyContent>,
}

impl Request {
    /// Creates an empty `RequestBuilder`.
    pub fn builder() -> RequestBuilder {
        RequestBuilder::new()
    }

    /// Shorthand for a body-less GET.
    pub fn get(url: impl AsRef<str>) -> Result<Self> {
        Self::builder().method(Method::GET).url(url)?.build()
    }

    /// Starts a builder pre-filled with this request's contents.
    pub fn to_builder(&self) -> RequestBuilder {
        RequestBuilder {
            url: Some(self.url.clone()),
            method: Some(self.method.clone()),
            charset: self.charset.clone(),
            query: self.query.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }

    /// Returns a copy without the header `name`.
    pub fn without_header(&self, name: &HeaderName) -> Request {
        let mut copy = self.clone();
        copy.headers.remove(name);
        copy
    }

    /// The target URL as given, without the query multimap applied.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The target URL with the query parameters appended, keys in order and
    /// then values in order, percent-encoded.
    pub fn full_url(&self) -> Url {
        let mut url = self.url.clone();
        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, values) in &self.query {
                for value in values {
                    pairs.append_pair(key, value);
                }
            }
        }
        url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    pub fn query_params(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.query
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns a header value by name, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    pub fn body(&self) -> Option<&BodyContent> {
        self.body.as_ref()
    }
}

/// Builder for [`Request`].
///
/// Every `build()` produces a new `Request`; the builder can keep being
/// changed and built again.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    url: Option<Url>,
    method: Option<Method>,
    charset: String,
    query: BTreeMap<String, BTreeSet<String>>,
    headers: HeaderMap,
    body: Option<BodyContent>,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            url: None,
            method: None,
            charset: DEFAULT_CHARSET.to_string(),
            query: BTreeMap::new(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Sets the target URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    pub fn parsed_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Sets the charset label used for text and object bodies.
    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    /// Adds a value to a query parameter. Repeated values are kept once.
    pub fn query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.entry(key.into()).or_default().insert(value.into());
        self
    }

    pub fn query_params<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in params {
            self = self.query_param(key, value);
        }
        self
    }

    pub fn remove_query_param(mut self, key: &str) -> Self {
        self.query.remove(key);
        self
    }

    /// Sets a header; a later call for the same name wins.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let (name, value) = parse_header(name.as_ref(), value.as_ref())?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Sets every header in `headers`, replacing same-named ones.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        crate::headers::overlay(&mut self.headers, &headers);
        self
    }

    pub fn remove_header(mut self, name: &HeaderName) -> Self {
        self.headers.remove(name);
        self
    }

    pub fn body(mut self, body: BodyContent) -> Self {
        self.body = Some(body);
        self
    }

    pub fn clear_body(mut self) -> Self {
        self.body = None;
        self
    }

    /// Builds the `Request`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the method or URL was never set.
    pub fn build(&self) -> Result<Request> {
        let method = self
            .method
            .clone()
            .ok_or_else(|| Error::InvalidRequest("HTTP method is required".to_string()))?;
        let url = self
            .url
            .clone()
            .ok_or_else(|| Error::InvalidRequest("URL is required".to_string()))?;

        if let Some(body) = &self.body {
            if method == Method::GET || method == Method::HEAD {
                tracing::debug!(
                    method = %method,
                    url = %url,
                    body = body.kind(),
                    "Request carries a body on a method that conventionally has none"
                );
            }
        }

        Ok(Request {
            url,
            method,
            charset: self.charset.clone(),
            query: self.query.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
        })
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}
