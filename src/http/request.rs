//! Outgoing request description and its builder.
//!
//! A [`RequestSpec`] is the concrete, transport-ready form of a logical call.
//! It is produced once per call by [`RequestSpecBuilder`], which applies the
//! defaults: `POST` when no method is given, and an address resolved from the
//! service's domain plus the path registered for the URL key.

use std::time::Duration;

use url::Url;

use super::{Headers, Method, Multipart, UploadFile};
use crate::endpoint::EndpointResolver;
use crate::error::ConfigError;

/// The body (or query) data of a request.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Payload {
    #[default]
    Empty,
    Text(String),
    Json(serde_json::Value),
    /// URL-encoded key/value pairs.
    Form(Vec<(String, String)>),
    Multipart(Multipart),
}

impl Payload {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.is_empty(),
            Self::Json(v) => v.is_null(),
            Self::Form(pairs) => pairs.is_empty(),
            Self::Multipart(form) => form.fields.is_empty() && form.files.is_empty(),
        }
    }

    /// Returns `true` if the payload uploads at least one file.
    pub fn has_files(&self) -> bool {
        matches!(self, Self::Multipart(form) if !form.files.is_empty())
    }

    /// Flattens the payload into key/value pairs when it has that shape.
    ///
    /// Form pairs are returned as-is; a JSON object yields one pair per
    /// member, with string members unquoted. Other payloads return `None`.
    pub fn as_pairs(&self) -> Option<Vec<(String, String)>> {
        match self {
            Self::Form(pairs) => Some(pairs.clone()),
            Self::Json(serde_json::Value::Object(map)) => Some(
                map.iter()
                    .map(|(k, v)| {
                        let value = match v {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (k.clone(), value)
                    })
                    .collect(),
            ),
            Self::Multipart(form) => Some(form.fields.clone()),
            _ => None,
        }
    }

    /// Renders the payload as text, the form RPC transports receive.
    ///
    /// File parts are not representable as text and are left out.
    pub fn to_text(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Text(s) => s.clone(),
            Self::Json(v) => v.to_string(),
            Self::Form(pairs) => encode_pairs(pairs),
            Self::Multipart(form) => encode_pairs(&form.fields),
        }
    }
}

pub(crate) fn encode_pairs(pairs: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

/// A complete, immutable request ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    address: String,
    method: Method,
    payload: Payload,
    headers: Headers,
    cookies: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl RequestSpec {
    /// Starts a new builder.
    pub fn builder() -> RequestSpecBuilder {
        RequestSpecBuilder::new()
    }

    /// Absolute address, e.g. `http://api.internal/users` or `rpc-host:50051/pkg.Svc/Get`.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Mutable headers, for interceptors decorating their own copy of the request.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn cookies(&self) -> &[(String, String)] {
        &self.cookies
    }

    /// Renders the cookies as a single `Cookie` header value.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Deadline budget for the whole call, shared by every retry attempt.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        if self.timeout.is_none() {
            self.timeout = timeout;
        }
        self
    }
}

/// Accumulates a partial request and finalizes it into a [`RequestSpec`].
///
/// Every setter consumes and returns the builder, so a builder value can be
/// cloned and reused across calls without the calls aliasing each other.
///
/// # Examples
///
/// ```
/// use outpost::http::{Method, RequestSpec};
///
/// let spec = RequestSpec::builder()
///     .address("http://members.internal/kyc")
///     .method(Method::Get)
///     .form_field("phonenumber", "0771990039")
///     .header("Accept", "application/json")
///     .build()
///     .unwrap();
///
/// assert_eq!(spec.method(), &Method::Get);
/// assert_eq!(spec.headers().get("accept"), Some("application/json"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestSpecBuilder {
    address: Option<String>,
    method: Option<Method>,
    payload: Payload,
    headers: Headers,
    cookies: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl RequestSpecBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an explicit address, bypassing endpoint resolution.
    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    #[must_use]
    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub fn text(self, text: impl Into<String>) -> Self {
        self.payload(Payload::Text(text.into()))
    }

    #[must_use]
    pub fn json(self, value: serde_json::Value) -> Self {
        self.payload(Payload::Json(value))
    }

    /// Appends a form field, converting a non-form payload into a form first.
    #[must_use]
    pub fn form_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let pair = (name.into(), value.into());
        self.payload = match self.payload {
            Payload::Form(mut pairs) => {
                pairs.push(pair);
                Payload::Form(pairs)
            }
            Payload::Multipart(mut form) => {
                form.fields.push(pair);
                Payload::Multipart(form)
            }
            other => {
                let mut pairs = other.as_pairs().unwrap_or_default();
                pairs.push(pair);
                Payload::Form(pairs)
            }
        };
        self
    }

    /// Adds a file part, turning the payload into a multipart form.
    ///
    /// Existing key/value data is kept as plain fields; text payloads are dropped.
    #[must_use]
    pub fn file(mut self, file: UploadFile) -> Self {
        self.payload = match self.payload {
            Payload::Multipart(mut form) => {
                form.files.push(file);
                Payload::Multipart(form)
            }
            other => Payload::Multipart(Multipart {
                fields: other.as_pairs().unwrap_or_default(),
                files: vec![file],
            }),
        };
        self
    }

    /// Appends a header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets each header, replacing any existing values with the same name.
    #[must_use]
    pub fn headers<K, V>(mut self, headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in headers {
            self.headers.set(name, value);
        }
        self
    }

    #[must_use]
    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Finalizes the builder, resolving the address through `resolver` when unset.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownService`] or [`ConfigError::UnknownUrl`] if the
    /// address has to be resolved and the resolver has no mapping for it.
    pub fn resolve(
        mut self,
        resolver: &dyn EndpointResolver,
        service: &str,
        url_key: &str,
    ) -> Result<RequestSpec, ConfigError> {
        if self.address.as_deref().is_none_or(str::is_empty) {
            let domain = resolver
                .domain(service)
                .ok_or_else(|| ConfigError::UnknownService(service.to_owned()))?;
            let path = resolver
                .path(service, url_key)
                .ok_or_else(|| ConfigError::UnknownUrl {
                    service: service.to_owned(),
                    url_key: url_key.to_owned(),
                })?;
            self.address = Some(format!("{domain}{path}"));
        }
        self.build()
    }

    /// Finalizes a builder that already carries an explicit address.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidAddress`] if no address was set.
    pub fn build(self) -> Result<RequestSpec, ConfigError> {
        let address = self
            .address
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| ConfigError::InvalidAddress {
                address: String::new(),
                reason: "address is not set".into(),
            })?;
        Ok(RequestSpec {
            address,
            method: self.method.unwrap_or_default(),
            payload: self.payload,
            headers: self.headers,
            cookies: self.cookies,
            timeout: self.timeout,
        })
    }
}

/// Splits an address into its destination identity (`host[:port]`) and path.
///
/// Addresses without a scheme are treated as `http://`.
///
/// # Examples
///
/// ```
/// use outpost::http::split_address;
///
/// let (destination, path) = split_address("rpc.internal:50051/member.Member/Get").unwrap();
/// assert_eq!(destination, "rpc.internal:50051");
/// assert_eq!(path, "/member.Member/Get");
/// ```
pub fn split_address(address: &str) -> Result<(String, String), ConfigError> {
    let address = address.trim();
    let normalized = if address.starts_with("http://") || address.starts_with("https://") {
        address.to_owned()
    } else {
        format!("http://{address}")
    };

    let url = Url::parse(&normalized).map_err(|e| ConfigError::InvalidAddress {
        address: address.to_owned(),
        reason: e.to_string(),
    })?;
    let host = url.host_str().ok_or_else(|| ConfigError::InvalidAddress {
        address: address.to_owned(),
        reason: "missing host".into(),
    })?;

    // `Url::port` hides a port equal to the scheme default; keep it if written.
    let port = url
        .port()
        .or_else(|| has_explicit_port(&normalized).then(|| url.port_or_known_default()).flatten());
    let destination = match port {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    };
    Ok((destination, url.path().to_owned()))
}

fn has_explicit_port(url: &str) -> bool {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or(authority);
    host_port
        .rsplit_once(':')
        .is_some_and(|(_, port)| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{EndpointTable, ServiceEndpoint};
    use serde_json::json;

    fn table() -> EndpointTable {
        EndpointTable::new().with_service(
            "members",
            ServiceEndpoint::new("http://members.internal")
                .url("MobileCheckKYC", "/api/kyc/check"),
        )
    }

    #[test]
    fn defaults_to_post_and_resolves_address() {
        let spec = RequestSpecBuilder::new()
            .resolve(&table(), "members", "MobileCheckKYC")
            .unwrap();
        assert_eq!(spec.method(), &Method::Post);
        assert_eq!(spec.address(), "http://members.internal/api/kyc/check");
    }

    #[test]
    fn explicit_address_skips_resolution() {
        let spec = RequestSpecBuilder::new()
            .address("http://override.internal/x")
            .method(Method::Get)
            .resolve(&table(), "unknown-service", "nothing")
            .unwrap();
        assert_eq!(spec.address(), "http://override.internal/x");
        assert_eq!(spec.method(), &Method::Get);
    }

    #[test]
    fn unresolvable_service_or_url_is_config_error() {
        let err = RequestSpecBuilder::new()
            .resolve(&table(), "billing", "MobileCheckKYC")
            .unwrap_err();
        assert_eq!(err, ConfigError::UnknownService("billing".into()));

        let err = RequestSpecBuilder::new()
            .resolve(&table(), "members", "Missing")
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownUrl { ref url_key, .. } if url_key == "Missing"));
    }

    #[test]
    fn build_without_address_fails() {
        assert!(matches!(
            RequestSpecBuilder::new().build(),
            Err(ConfigError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn reused_builder_does_not_alias() {
        let base = RequestSpecBuilder::new().address("http://a/b");
        let first = base.clone().header("X-Call", "1").build().unwrap();
        let second = base.header("X-Call", "2").build().unwrap();
        assert_eq!(first.headers().get("x-call"), Some("1"));
        assert_eq!(second.headers().get("x-call"), Some("2"));
        assert_eq!(second.headers().len(), 1);
    }

    #[test]
    fn json_object_flattens_into_pairs() {
        let payload = Payload::Json(json!({"name": "HttpRequest", "version": 1}));
        let mut pairs = payload.as_pairs().unwrap();
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("name".to_string(), "HttpRequest".to_string()),
                ("version".to_string(), "1".to_string())
            ]
        );
        assert!(Payload::Text("raw".into()).as_pairs().is_none());
    }

    #[test]
    fn file_keeps_existing_fields() {
        let spec = RequestSpecBuilder::new()
            .address("http://a/upload")
            .form_field("order", "27")
            .file(UploadFile::new("file", "scan.jpeg", &b"jpg"[..]))
            .build()
            .unwrap();
        assert!(spec.payload().has_files());
        match spec.payload() {
            Payload::Multipart(form) => {
                assert_eq!(form.fields, vec![("order".to_string(), "27".to_string())]);
            }
            other => panic!("expected multipart, got {other:?}"),
        }
    }

    #[test]
    fn cookies_render_into_one_header() {
        let spec = RequestSpecBuilder::new()
            .address("http://a/")
            .cookie("session", "abc")
            .cookie("lang", "en")
            .build()
            .unwrap();
        assert_eq!(spec.cookie_header().as_deref(), Some("session=abc; lang=en"));
    }

    #[test]
    fn split_address_handles_schemes_and_ports() {
        assert_eq!(
            split_address("http://api.internal/v1/users").unwrap(),
            ("api.internal".to_string(), "/v1/users".to_string())
        );
        assert_eq!(
            split_address("10.0.0.5:9000/pkg.Svc/Call").unwrap(),
            ("10.0.0.5:9000".to_string(), "/pkg.Svc/Call".to_string())
        );
        assert!(split_address("http://").is_err());
    }

    #[test]
    fn split_address_keeps_a_written_default_port() {
        assert_eq!(
            split_address("rpc.internal:80/Svc/M").unwrap(),
            ("rpc.internal:80".to_string(), "/Svc/M".to_string())
        );
        assert_eq!(
            split_address("https://rpc.internal:443/Svc/M").unwrap(),
            ("rpc.internal:443".to_string(), "/Svc/M".to_string())
        );
        assert_eq!(
            split_address("http://[::1]:80/Svc/M").unwrap(),
            ("[::1]:80".to_string(), "/Svc/M".to_string())
        );
        assert_eq!(split_address("https://rpc.internal/Svc/M").unwrap().0, "rpc.internal");
    }
}
