//! Transport seams: the narrow interfaces the pipeline dispatches through.
//!
//! - [`HttpTransport`] sends a [`RequestSpec`] and yields an [`HttpReply`].
//!   [`Http1Transport`] is the built-in plain-HTTP/1.1 implementation.
//! - [`RpcTransport`] invokes a method over a channel borrowed from a
//!   [`ConnectionPool`](crate::pool::ConnectionPool).
//! - [`intercept`] wraps an HTTP transport in an ordered interceptor chain.

use std::future::Future;
use std::pin::Pin;

use crate::error::TransportError;
use crate::http::{Headers, Payload, RequestSpec, StatusCode};

pub mod http1;
pub mod intercept;

pub use http1::Http1Transport;
pub use intercept::{DefaultHeaders, Interceptor, InterceptorHandler, LoggingInterceptor, Next};

/// A boxed, `Send` future. The return type of every transport seam.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What an HTTP transport reports back for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: StatusCode,
    pub headers: Headers,
    pub body: String,
}

impl HttpReply {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: body.into(),
        }
    }
}

/// Issues one HTTP request.
///
/// Implementations must be cancel-safe: the pipeline drops the future when
/// the call's deadline passes.
pub trait HttpTransport: Send + Sync {
    fn send<'a>(&'a self, request: &'a RequestSpec) -> BoxFuture<'a, Result<HttpReply, TransportError>>;
}

/// Invokes one RPC method over a pooled channel of type `C`.
///
/// `method` is the path component of the request address, e.g.
/// `/member.Member/GetProfile`. The reply is the response payload as text.
pub trait RpcTransport<C>: Send + Sync {
    fn invoke<'a>(
        &'a self,
        channel: &'a C,
        method: &'a str,
        payload: &'a Payload,
    ) -> BoxFuture<'a, Result<String, TransportError>>;
}
