//! Error taxonomy for the outbound pipeline.
//!
//! Each concern owns one enum. [`ProxyError`] is what callers of
//! [`Proxy::submit`](crate::proxy::Proxy::submit) see; [`AttemptError`] is
//! what a single dispatch attempt records on its [`Response`](crate::http::Response).

use std::time::Duration;

use thiserror::Error;

use crate::http::StatusCode;
use crate::pool::ChannelState;

/// Missing or invalid configuration. Fatal to the call, never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("service name is empty")]
    EmptyServiceName,

    #[error("service `{0}` is not configured")]
    UnknownService(String),

    #[error("url key `{url_key}` is not configured for service `{service}`")]
    UnknownUrl { service: String, url_key: String },

    #[error("invalid address `{address}`: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("invalid settings: {0}")]
    Settings(String),
}

/// Failures of the connection pool: dialing, checkout and liveness.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("destination is empty")]
    EmptyDestination,

    #[error("failed to connect to {destination}: {reason}")]
    Dial { destination: String, reason: String },

    #[error("no connection to {destination} became available within {waited:?}")]
    Exhausted { destination: String, waited: Duration },

    #[error("connection pool for {destination} is shut down")]
    Closed { destination: String },

    #[error("connection to {destination} is unhealthy ({state})")]
    Unhealthy {
        destination: String,
        state: ChannelState,
    },
}

/// Network or protocol failure during one attempt.
///
/// Carries rendered messages rather than the underlying I/O error so that a
/// [`Response`](crate::http::Response) holding it stays `Clone`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("i/o error talking to {address}: {message}")]
    Io { address: String, message: String },

    #[error("malformed response from {address}: {message}")]
    Protocol { address: String, message: String },

    #[error("deadline exceeded after {elapsed:?}")]
    DeadlineExceeded { elapsed: Duration },

    #[error("rpc call `{method}` failed: {message}")]
    Rpc { method: String, message: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    pub(crate) fn io(address: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Io {
            address: address.into(),
            message: err.to_string(),
        }
    }
}

/// The failure recorded on a [`Response`](crate::http::Response) by a single attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AttemptError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("unexpected status {0}")]
    Status(StatusCode),

    /// A caller-supplied retry condition flagged an otherwise successful attempt.
    #[error("retry condition: {0}")]
    Rejected(String),
}

/// Failure reported by a [`CacheStore`](crate::cache::CacheStore) backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache write timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors returned to callers of the proxy.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{}:{}", .0.as_u16(), .0.canonical_reason().unwrap_or("Unknown Status"))]
    Status(StatusCode),

    #[error("retry condition not satisfied: {0}")]
    Rejected(String),

    /// The body could not be decoded into the caller's target type.
    #[error("failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<AttemptError> for ProxyError {
    fn from(err: AttemptError) -> Self {
        match err {
            AttemptError::Transport(e) => Self::Transport(e),
            AttemptError::Pool(e) => Self::Pool(e),
            AttemptError::Status(status) => Self::Status(status),
            AttemptError::Rejected(reason) => Self::Rejected(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_renders_code_and_reason() {
        let err = ProxyError::Status(StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.to_string(), "503:Service Unavailable");

        let err = ProxyError::Status(StatusCode::from_u16(599));
        assert_eq!(err.to_string(), "599:Unknown Status");
    }

    #[test]
    fn attempt_error_maps_onto_proxy_error() {
        let err: ProxyError = AttemptError::Rejected("no data".into()).into();
        assert!(matches!(err, ProxyError::Rejected(ref r) if r == "no data"));

        let err: ProxyError = AttemptError::Pool(PoolError::EmptyDestination).into();
        assert!(matches!(err, ProxyError::Pool(PoolError::EmptyDestination)));
    }
}
