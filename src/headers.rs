//! Client-wide headers shared by every request a client issues.

use crate::{Error, Result};
use http::header::{AUTHORIZATION, COOKIE, PROXY_AUTHORIZATION, SET_COOKIE};
use http::{HeaderMap, HeaderName, HeaderValue};
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Headers attached to every outbound request of a client instance.
///
/// Authentication completion writes credentials here and unauthorized retries
/// remove them, possibly from several tasks at once, so every access goes
/// through one lock. The lock is never held across an `.await`.
#[derive(Debug, Default)]
pub struct CommonHeaders {
    inner: RwLock<HeaderMap>,
}

impl CommonHeaders {
    /// Creates an empty header store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with `headers`.
    pub fn from_map(headers: HeaderMap) -> Self {
        Self {
            inner: RwLock::new(headers),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HeaderMap> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HeaderMap> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets a header, replacing any previous value. Returns the previous value.
    pub fn insert(&self, name: HeaderName, value: HeaderValue) -> Option<HeaderValue> {
        self.write().insert(name, value)
    }

    /// Parses and sets a header.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn set(&self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<()> {
        let (name, value) = parse_header(name.as_ref(), value.as_ref())?;
        self.insert(name, value);
        Ok(())
    }

    /// Returns a copy of the current value of `name`.
    pub fn get(&self, name: &HeaderName) -> Option<HeaderValue> {
        self.read().get(name).cloned()
    }

    /// Returns `true` if `name` is currently set.
    pub fn contains(&self, name: &HeaderName) -> bool {
        self.read().contains_key(name)
    }

    /// Removes `name` unconditionally.
    pub fn remove(&self, name: &HeaderName) -> Option<HeaderValue> {
        self.write().remove(name)
    }

    /// Removes `name` only if it still holds `expected`.
    ///
    /// A credential that another task refreshed in the meantime is left in
    /// place. Returns `true` if the header was removed.
    pub fn remove_if_matches(&self, name: &HeaderName, expected: &HeaderValue) -> bool {
        let mut headers = self.write();
        if headers.get(name) == Some(expected) {
            headers.remove(name);
            true
        } else {
            false
        }
    }

    /// Returns a point-in-time copy of all headers.
    pub fn snapshot(&self) -> HeaderMap {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

/// Parses a header name/value pair into `http` types.
pub(crate) fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let name = HeaderName::try_from(name)
        .map_err(|e| Error::InvalidRequest(format!("Invalid header name: {}", e)))?;
    let value = HeaderValue::try_from(value)
        .map_err(|e| Error::InvalidRequest(format!("Invalid header value: {}", e)))?;
    Ok((name, value))
}

/// Overlays `overrides` on `base`: every header name present in `overrides`
/// replaces all of its values in `base`.
pub(crate) fn overlay(base: &mut HeaderMap, overrides: &HeaderMap) {
    for name in overrides.keys() {
        base.remove(name);
    }
    for (name, value) in overrides {
        base.append(name.clone(), value.clone());
    }
}

fn is_credential(name: &HeaderName) -> bool {
    name == AUTHORIZATION || name == PROXY_AUTHORIZATION || name == COOKIE || name == SET_COOKIE
}

/// Formats a header map for trace logs with credential values masked.
pub(crate) struct Redacted<'a>(pub(crate) &'a HeaderMap);

impl fmt::Display for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in self.0 {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            if is_credential(name) || value.is_sensitive() {
                write!(f, "{}: <redacted>", name)?;
            } else {
                write!(f, "{}: {}", name, value.to_str().unwrap_or("<binary>"))?;
            }
        }
        Ok(())
    }
}
