//! Deserializable transport settings.
//!
//! Lets a host application keep client settings in its own configuration
//! source (file, environment, service registry) and turn them into a
//! [`ClientBuilder`] without repeating the builder calls.

use crate::client::{ClientBuilder, DEFAULT_ACCEPT};
use crate::proxy::ProxyConfig;
use crate::Result;
use serde::Deserialize;

/// Transport settings as they appear in configuration.
///
/// The `proxy` table is required. Use an empty table (or omit `host` and
/// `port`) for direct connections.
///
/// # Examples
///
/// ```
/// use restkeep::TransportSettings;
///
/// let settings: TransportSettings = serde_json::from_str(r#"{
///     "timeout_secs": 15,
///     "proxy": {
///         "host": "proxy.corp.local",
///         "port": 3128,
///         "credentials": { "kind": "basic", "username": "svc", "password": "pw" }
///     }
/// }"#).unwrap();
///
/// let client = settings.into_builder().unwrap().build().unwrap();
/// assert!(!client.proxy().is_none());
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct TransportSettings {
    /// Connect and request timeout in seconds. Must be greater than zero.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Accept any server certificate. Never on by default.
    #[serde(default)]
    pub trust_all_certificates: bool,
    pub proxy: ProxyConfig,
    /// `Accept` value for GET requests that do not set one.
    #[serde(default = "default_accept")]
    pub default_accept: String,
    /// Trace-log request and response headers.
    #[serde(default)]
    pub verbose: bool,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_accept() -> String {
    DEFAULT_ACCEPT.to_string()
}

impl TransportSettings {
    /// Settings for a direct connection with all defaults.
    pub fn direct() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            trust_all_certificates: false,
            proxy: ProxyConfig::none(),
            default_accept: default_accept(),
            verbose: false,
        }
    }

    /// Converts the settings into a builder, to which common headers or a
    /// shared credential store can still be added.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`](crate::Error::Configuration) if
    /// `default_accept` is not a valid header value. The remaining checks
    /// happen in [`ClientBuilder::build`].
    pub fn into_builder(self) -> Result<ClientBuilder> {
        ClientBuilder::new()
            .timeout_secs(self.timeout_secs)
            .trust_all_certificates(self.trust_all_certificates)
            .proxy(self.proxy)
            .verbose(self.verbose)
            .default_accept(&self.default_accept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use serde_json::json;

    #[test]
    fn test_defaults_apply() {
        let settings: TransportSettings = serde_json::from_value(json!({ "proxy": {} })).unwrap();
        assert_eq!(settings.timeout_secs, 30);
        assert!(!settings.trust_all_certificates);
        assert!(settings.proxy.is_none());
        assert_eq!(settings.default_accept, "application/json");
    }

    #[test]
    fn test_proxy_table_is_required() {
        let result = serde_json::from_value::<TransportSettings>(json!({ "timeout_secs": 5 }));
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_timeout_fails_at_build() {
        let settings: TransportSettings =
            serde_json::from_value(json!({ "timeout_secs": 0, "proxy": {} })).unwrap();
        let result = settings.into_builder().unwrap().build();
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_password_is_not_debug_printed() {
        let settings: TransportSettings = serde_json::from_value(json!({
            "proxy": {
                "host": "proxy.local",
                "port": 8080,
                "credentials": {
                    "kind": "ntlm",
                    "username": "bob",
                    "password": "hunter2",
                    "domain": "CORP",
                    "workstation": "WS01"
                }
            }
        }))
        .unwrap();
        assert!(!format!("{:?}", settings).contains("hunter2"));
        let client = settings.into_builder().unwrap().build().unwrap();
        assert_eq!(client.proxy().port, 8080);
    }
}
