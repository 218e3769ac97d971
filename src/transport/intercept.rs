//! Interceptor chain: composable before/after logic around an HTTP transport.
//!
//! Each interceptor wraps the next layer, so it can decorate the outgoing
//! request, short-circuit with its own reply, or inspect the reply on the
//! way back. The innermost layer is the [`HttpTransport`] itself.
//!
//! ## Core types
//!
//! - [`Interceptor`]: trait implemented by all interceptors.
//! - [`Next`]: cursor into the remaining chain; call [`Next::run`] to advance.
//! - [`InterceptorHandler`]: type-erased, cheaply-cloneable interceptor.
//! - [`from_interceptor`]: converts an [`Interceptor`] into an [`InterceptorHandler`].
//! - [`LoggingInterceptor`], [`DefaultHeaders`]: built-ins.

use std::sync::Arc;

use tokio::time::Instant;

use super::{BoxFuture, HttpReply, HttpTransport};
use crate::error::TransportError;
use crate::http::{Headers, RequestSpec};

/// A type-erased, reference-counted interceptor function.
pub type InterceptorHandler = Arc<
    dyn Fn(RequestSpec, Next) -> BoxFuture<'static, Result<HttpReply, TransportError>>
        + Send
        + Sync
        + 'static,
>;

/// Converts an [`Interceptor`] implementation into an [`InterceptorHandler`].
pub fn from_interceptor<I>(interceptor: Arc<I>) -> InterceptorHandler
where
    I: Interceptor + 'static,
{
    Arc::new(move |request: RequestSpec, next: Next| interceptor.handle(request, next))
}

/// A cursor into the remaining interceptor chain for one attempt.
///
/// `Next` is consumed by [`run`](Self::run), so each interceptor can forward
/// at most once. When the chain is exhausted the request goes to the transport.
pub struct Next {
    chain: Arc<[InterceptorHandler]>,
    index: usize,
    transport: Arc<dyn HttpTransport>,
}

impl Next {
    /// Positions a cursor at the start of `chain`, ending in `transport`.
    pub fn new(chain: Arc<[InterceptorHandler]>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            chain,
            index: 0,
            transport,
        }
    }

    /// Invokes the next interceptor, or the transport once the chain is spent.
    pub async fn run(mut self, request: RequestSpec) -> Result<HttpReply, TransportError> {
        if self.index < self.chain.len() {
            let handler = self.chain[self.index].clone();
            self.index += 1;
            handler(request, self).await
        } else {
            self.transport.send(&request).await
        }
    }
}

/// The core interceptor trait.
///
/// Implementations receive their own copy of the request and the [`Next`]
/// cursor. They may pass through, short-circuit by returning a reply without
/// calling `next`, or decorate the reply returned by `next`.
pub trait Interceptor: Send + Sync {
    fn handle(
        &self,
        request: RequestSpec,
        next: Next,
    ) -> BoxFuture<'static, Result<HttpReply, TransportError>>;
}

/// Logs method, address, status and duration of every exchange.
pub struct LoggingInterceptor;

impl Interceptor for LoggingInterceptor {
    fn handle(
        &self,
        request: RequestSpec,
        next: Next,
    ) -> BoxFuture<'static, Result<HttpReply, TransportError>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = request.method().to_string();
            let address = request.address().to_owned();

            let result = next.run(request).await;

            let duration = start.elapsed();
            match &result {
                Ok(reply) => tracing::info!(
                    %method, %address, status = reply.status.as_u16(), ?duration, "outbound request"
                ),
                Err(e) => tracing::info!(%method, %address, error = %e, ?duration, "outbound request failed"),
            }
            result
        })
    }
}

/// Adds headers to every request that does not already carry them.
///
/// # Examples
///
/// ```
/// use outpost::transport::DefaultHeaders;
///
/// let defaults = DefaultHeaders::new()
///     .header("User-Agent", "outpost/0.1")
///     .header("Accept", "application/json");
/// ```
#[derive(Debug, Clone, Default)]
pub struct DefaultHeaders {
    headers: Headers,
}

impl DefaultHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }
}

impl Interceptor for DefaultHeaders {
    fn handle(
        &self,
        mut request: RequestSpec,
        next: Next,
    ) -> BoxFuture<'static, Result<HttpReply, TransportError>> {
        for (name, value) in self.headers.iter() {
            if !request.headers().contains(name) {
                request.headers_mut().insert(name, value);
            }
        }
        Box::pin(next.run(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::StatusCode;
    use std::sync::Mutex;

    /// Echoes the request headers back as the body.
    struct EchoHeaders {
        seen: Mutex<Vec<String>>,
    }

    impl HttpTransport for EchoHeaders {
        fn send<'a>(&'a self, request: &'a RequestSpec) -> BoxFuture<'a, Result<HttpReply, TransportError>> {
            self.seen.lock().unwrap().push(request.address().to_owned());
            let body = request.headers().to_string();
            Box::pin(async move { Ok(HttpReply::new(StatusCode::OK, body)) })
        }
    }

    struct ShortCircuit;

    impl Interceptor for ShortCircuit {
        fn handle(
            &self,
            _request: RequestSpec,
            _next: Next,
        ) -> BoxFuture<'static, Result<HttpReply, TransportError>> {
            Box::pin(async { Ok(HttpReply::new(StatusCode::TOO_MANY_REQUESTS, "local limit")) })
        }
    }

    fn request() -> RequestSpec {
        RequestSpec::builder()
            .address("http://api.internal/x")
            .header("Accept", "text/plain")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn empty_chain_goes_straight_to_transport() {
        let transport = Arc::new(EchoHeaders { seen: Mutex::new(vec![]) });
        let reply = Next::new(Arc::from(Vec::new()), transport.clone())
            .run(request())
            .await
            .unwrap();
        assert_eq!(reply.body, "Accept: text/plain\r\n");
        assert_eq!(transport.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn default_headers_do_not_override_request_headers() {
        let transport = Arc::new(EchoHeaders { seen: Mutex::new(vec![]) });
        let chain: Arc<[InterceptorHandler]> = Arc::from(vec![
            from_interceptor(Arc::new(LoggingInterceptor)),
            from_interceptor(Arc::new(
                DefaultHeaders::new()
                    .header("Accept", "application/json")
                    .header("User-Agent", "outpost"),
            )),
        ]);
        let reply = Next::new(chain, transport).run(request()).await.unwrap();
        assert_eq!(reply.body, "Accept: text/plain\r\nUser-Agent: outpost\r\n");
    }

    #[tokio::test]
    async fn short_circuit_skips_transport() {
        let transport = Arc::new(EchoHeaders { seen: Mutex::new(vec![]) });
        let chain: Arc<[InterceptorHandler]> =
            Arc::from(vec![from_interceptor(Arc::new(ShortCircuit))]);
        let reply = Next::new(chain, transport.clone()).run(request()).await.unwrap();
        assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);
        assert!(transport.seen.lock().unwrap().is_empty());
    }
}
