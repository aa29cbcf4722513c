//! Proxy routing and proxy credentials.
//!
//! A client always has a [`ProxyConfig`]. Direct connections use the
//! [`ProxyConfig::none`] sentinel (blank host, port 0), so "no proxy" is a
//! deliberate choice rather than a missing value.

use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::HeaderValue;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use url::Url;

/// Credentials presented to a proxy.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProxyCredentials {
    /// Plain username/password.
    Basic {
        username: String,
        password: SecretString,
    },
    /// NTLM-style account with a domain and workstation.
    Ntlm {
        username: String,
        password: SecretString,
        domain: String,
        workstation: String,
    },
}

impl ProxyCredentials {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        ProxyCredentials::Basic {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    pub fn ntlm(
        username: impl Into<String>,
        password: impl Into<String>,
        domain: impl Into<String>,
        workstation: impl Into<String>,
    ) -> Self {
        ProxyCredentials::Ntlm {
            username: username.into(),
            password: SecretString::from(password.into()),
            domain: domain.into(),
            workstation: workstation.into(),
        }
    }

    /// The account name as the proxy sees it: `DOMAIN\user` for NTLM accounts.
    pub fn principal(&self) -> String {
        match self {
            ProxyCredentials::Basic { username, .. } => username.clone(),
            ProxyCredentials::Ntlm {
                username, domain, ..
            } if !domain.is_empty() => format!("{}\\{}", domain, username),
            ProxyCredentials::Ntlm { username, .. } => username.clone(),
        }
    }

    pub(crate) fn password(&self) -> &str {
        match self {
            ProxyCredentials::Basic { password, .. } | ProxyCredentials::Ntlm { password, .. } => {
                password.expose_secret()
            }
        }
    }

    /// The `Proxy-Authorization` value for these credentials.
    ///
    /// The transport speaks Basic only; NTLM accounts are sent as
    /// `DOMAIN\user` and the workstation is not transmitted.
    pub fn authorization_value(&self) -> Result<HeaderValue> {
        if let ProxyCredentials::Ntlm { workstation, .. } = self {
            tracing::debug!(
                workstation = %workstation,
                "NTLM proxy account sent as Basic credentials"
            );
        }
        let token = STANDARD.encode(format!("{}:{}", self.principal(), self.password()));
        let mut value = HeaderValue::try_from(format!("Basic {}", token)).map_err(|e| {
            Error::Configuration(format!("Invalid proxy credentials: {}", e))
        })?;
        value.set_sensitive(true);
        Ok(value)
    }
}

/// Where and how to reach a proxy.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub credentials: Option<ProxyCredentials>,
}

impl ProxyConfig {
    /// The "no proxy" sentinel: connect directly.
    pub fn none() -> Self {
        Self {
            host: String::new(),
            port: 0,
            credentials: None,
        }
    }

    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: ProxyCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Returns `true` for the [`ProxyConfig::none`] sentinel.
    pub fn is_none(&self) -> bool {
        self.host.trim().is_empty() && self.port == 0
    }

    pub fn scope(&self) -> AuthScope {
        AuthScope::new(&self.host, self.port)
    }

    /// The proxy URL, `http://host:port`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for the sentinel or a half-filled
    /// descriptor (host without port or port without host).
    pub fn url(&self) -> Result<Url> {
        if self.host.trim().is_empty() || self.port == 0 {
            return Err(Error::Configuration(format!(
                "Proxy needs both a host and a non-zero port (host: {:?}, port: {})",
                self.host, self.port
            )));
        }
        Url::parse(&format!("http://{}:{}", self.host.trim(), self.port))
            .map_err(|e| Error::Configuration(format!("Invalid proxy address: {}", e)))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.is_none() {
            if self.credentials.is_some() {
                return Err(Error::Configuration(
                    "Proxy credentials given without a proxy host".to_string(),
                ));
            }
            return Ok(());
        }
        self.url().map(|_| ())
    }
}

/// The host/port pair credentials apply to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthScope {
    host: String,
    port: u16,
}

impl AuthScope {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.trim().to_ascii_lowercase(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Credentials keyed by scope, shared by every request of a client.
///
/// The client consults the store on each call, so replacing an entry takes
/// effect for the next request without rebuilding the client.
#[derive(Debug, Default)]
pub struct CredentialStore {
    entries: RwLock<HashMap<AuthScope, ProxyCredentials>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `credentials` for `scope`, returning what was there before.
    pub fn set_credentials(
        &self,
        scope: AuthScope,
        credentials: ProxyCredentials,
    ) -> Option<ProxyCredentials> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(scope, credentials)
    }

    pub fn credentials(&self, scope: &AuthScope) -> Option<ProxyCredentials> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(scope)
            .cloned()
    }

    pub fn remove(&self, scope: &AuthScope) -> Option<ProxyCredentials> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(scope)
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_is_distinguishable() {
        let none = ProxyConfig::none();
        assert!(none.is_none());
        assert!(none.validate().is_ok());
        assert!(none.url().is_err());

        let real = ProxyConfig::new("proxy.local", 3128);
        assert!(!real.is_none());
        assert_eq!(real.url().unwrap().as_str(), "http://proxy.local:3128/");
    }

    #[test]
    fn test_half_filled_proxy_is_rejected() {
        assert!(matches!(
            ProxyConfig::new("proxy.local", 0).validate(),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            ProxyConfig::new("", 8080).validate(),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            ProxyConfig::none()
                .with_credentials(ProxyCredentials::basic("u", "p"))
                .validate(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_basic_authorization_value() {
        let value = ProxyCredentials::basic("aladdin", "opensesame")
            .authorization_value()
            .unwrap();
        assert_eq!(value, "Basic YWxhZGRpbjpvcGVuc2VzYW1l");
        assert!(value.is_sensitive());
    }

    #[test]
    fn test_ntlm_principal_includes_domain() {
        let credentials = ProxyCredentials::ntlm("bob", "pw", "CORP", "WS01");
        assert_eq!(credentials.principal(), "CORP\\bob");
    }

    #[test]
    fn test_store_scopes_are_case_insensitive() {
        let store = CredentialStore::new();
        store.set_credentials(
            AuthScope::new("Proxy.Local", 3128),
            ProxyCredentials::basic("u", "p"),
        );
        assert!(store.credentials(&AuthScope::new("proxy.local", 3128)).is_some());
        assert!(store.credentials(&AuthScope::new("proxy.local", 8080)).is_none());
    }

    #[test]
    fn test_credentials_deserialize_from_config() {
        let config: ProxyConfig = serde_json::from_value(serde_json::json!({
            "host": "proxy.local",
            "port": 3128,
            "credentials": { "kind": "basic", "username": "u", "password": "p" }
        }))
        .unwrap();
        assert_eq!(config.credentials.unwrap().principal(), "u");
    }
}
