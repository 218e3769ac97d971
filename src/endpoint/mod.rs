//! Service endpoint resolution.
//!
//! A logical call names a service and a URL key; the [`EndpointResolver`]
//! maps them onto a domain and a path. [`EndpointTable`] is the serde-backed
//! implementation loaded from configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Maps service identities and URL keys onto addresses.
///
/// Returning `None` means "no mapping", which callers surface as a
/// [`ConfigError`].
pub trait EndpointResolver: Send + Sync {
    /// Base address of the service, e.g. `http://members.internal`.
    fn domain(&self, service: &str) -> Option<&str>;

    /// Path registered for `url_key` under the service, e.g. `/api/kyc/check`.
    fn path(&self, service: &str, url_key: &str) -> Option<&str>;
}

/// One service's domain and its named URL paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub domain: String,
    #[serde(default)]
    pub urls: HashMap<String, String>,
}

impl ServiceEndpoint {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            urls: HashMap::new(),
        }
    }

    #[must_use]
    pub fn url(mut self, key: impl Into<String>, path: impl Into<String>) -> Self {
        self.urls.insert(key.into(), path.into());
        self
    }
}

/// Endpoint table keyed by service name.
///
/// # Examples
///
/// ```
/// use outpost::endpoint::{EndpointResolver, EndpointTable};
///
/// let table = EndpointTable::from_json_str(r#"{
///     "services": {
///         "members": {
///             "domain": "http://members.internal",
///             "urls": { "MobileCheckKYC": "/api/kyc/check" }
///         }
///     }
/// }"#).unwrap();
///
/// assert_eq!(table.domain("members"), Some("http://members.internal"));
/// assert_eq!(table.path("members", "MobileCheckKYC"), Some("/api/kyc/check"));
/// assert_eq!(table.path("members", "Other"), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointTable {
    #[serde(default)]
    services: HashMap<String, ServiceEndpoint>,
}

impl EndpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_service(mut self, name: impl Into<String>, endpoint: ServiceEndpoint) -> Self {
        self.services.insert(name.into(), endpoint);
        self
    }

    /// Parses a table from JSON.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Settings`] if the document is not a valid table.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Settings(format!("endpoint table: {e}")))
    }

    pub fn service(&self, name: &str) -> Option<&ServiceEndpoint> {
        self.services.get(name)
    }
}

impl EndpointResolver for EndpointTable {
    fn domain(&self, service: &str) -> Option<&str> {
        self.services
            .get(service)
            .map(|s| s.domain.as_str())
            .filter(|d| !d.is_empty())
    }

    fn path(&self, service: &str, url_key: &str) -> Option<&str> {
        self.services
            .get(service)?
            .urls
            .get(url_key)
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_domain_counts_as_missing() {
        let table = EndpointTable::new().with_service("blank", ServiceEndpoint::new(""));
        assert!(table.service("blank").is_some());
        assert_eq!(table.domain("blank"), None);
    }

    #[test]
    fn malformed_json_is_settings_error() {
        let err = EndpointTable::from_json_str("{\"services\": 3}").unwrap_err();
        assert!(matches!(err, ConfigError::Settings(ref m) if m.starts_with("endpoint table")));
    }

    #[test]
    fn urls_are_optional_in_json() {
        let table =
            EndpointTable::from_json_str(r#"{"services":{"rpc":{"domain":"rpc.internal:50051"}}}"#)
                .unwrap();
        assert_eq!(table.domain("rpc"), Some("rpc.internal:50051"));
        assert_eq!(table.path("rpc", "Get"), None);
    }
}
