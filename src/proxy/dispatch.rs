//! How a call reaches its destination: plain HTTP, or RPC over a pooled channel.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{ProxyError, TransportError};
use crate::http::{RequestSpec, StatusCode, split_address};
use crate::pool::{Channel, Lease, PoolConfig, PoolRegistry};
use crate::transport::{
    BoxFuture, HttpTransport, Interceptor, InterceptorHandler, Next, RpcTransport, intercept,
};

/// One way of dispatching a [`RequestSpec`].
///
/// `open` runs once per call and prepares whatever the attempts share (for
/// RPC, a leased channel). `attempt` runs once per retry attempt. Dropping
/// the session releases what `open` acquired.
pub trait Dispatcher: Send + Sync {
    type Session: Send + Sync;

    fn open<'a>(&'a self, request: &'a RequestSpec) -> BoxFuture<'a, Result<Self::Session, ProxyError>>;

    fn attempt<'a>(
        &'a self,
        session: &'a Self::Session,
        request: &'a RequestSpec,
    ) -> BoxFuture<'a, Result<(StatusCode, String), TransportError>>;

    /// Deadline applied to requests that carry none of their own.
    fn default_timeout(&self) -> Option<Duration> {
        None
    }
}

/// Sends each attempt through an interceptor chain ending in an [`HttpTransport`].
#[derive(Clone)]
pub struct HttpDispatcher {
    transport: Arc<dyn HttpTransport>,
    chain: Arc<[InterceptorHandler]>,
}

impl HttpDispatcher {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            chain: Arc::from(Vec::new()),
        }
    }

    /// Appends an interceptor. The first one added runs outermost.
    #[must_use]
    pub fn with_interceptor<I: Interceptor + 'static>(self, interceptor: I) -> Self {
        let mut chain = self.chain.to_vec();
        chain.push(intercept::from_interceptor(Arc::new(interceptor)));
        Self {
            transport: self.transport,
            chain: Arc::from(chain),
        }
    }
}

impl Dispatcher for HttpDispatcher {
    type Session = ();

    fn open<'a>(&'a self, _request: &'a RequestSpec) -> BoxFuture<'a, Result<(), ProxyError>> {
        Box::pin(async { Ok(()) })
    }

    fn attempt<'a>(
        &'a self,
        _session: &'a (),
        request: &'a RequestSpec,
    ) -> BoxFuture<'a, Result<(StatusCode, String), TransportError>> {
        Box::pin(async move {
            let next = Next::new(Arc::clone(&self.chain), Arc::clone(&self.transport));
            let reply = next.run(request.clone()).await?;
            Ok((reply.status, reply.body))
        })
    }
}

/// A leased channel plus the method every attempt of the call invokes.
pub struct RpcSession<C: Channel> {
    lease: Lease<C>,
    method: String,
}

impl<C: Channel> RpcSession<C> {
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn destination(&self) -> &str {
        self.lease.destination()
    }
}

/// Invokes the method named by the address path over a channel leased from
/// the pool of the address's `host[:port]`.
pub struct RpcDispatcher<C: Channel> {
    registry: Arc<PoolRegistry<C>>,
    transport: Arc<dyn RpcTransport<C>>,
    pool_config: Option<PoolConfig<C>>,
    timeout: Option<Duration>,
}

impl<C: Channel> RpcDispatcher<C> {
    pub fn new(registry: Arc<PoolRegistry<C>>, transport: Arc<dyn RpcTransport<C>>) -> Self {
        Self {
            registry,
            transport,
            pool_config: None,
            timeout: None,
        }
    }

    /// Overrides used when this dispatcher is the first to reach a destination.
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig<C>) -> Self {
        self.pool_config = Some(config);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<PoolRegistry<C>> {
        &self.registry
    }

    pub(crate) fn config(&self) -> Option<&PoolConfig<C>> {
        self.pool_config.as_ref()
    }
}

impl<C: Channel> Dispatcher for RpcDispatcher<C> {
    type Session = RpcSession<C>;

    fn open<'a>(&'a self, request: &'a RequestSpec) -> BoxFuture<'a, Result<RpcSession<C>, ProxyError>> {
        Box::pin(async move {
            let (destination, method) = split_address(request.address())?;
            if method.trim_matches('/').is_empty() {
                return Err(TransportError::InvalidRequest(format!(
                    "address `{}` names no rpc method",
                    request.address()
                ))
                .into());
            }
            let pool = self.registry.get_pool(&destination, self.config())?;
            let lease = pool.get().await?;
            Ok(RpcSession { lease, method })
        })
    }

    fn attempt<'a>(
        &'a self,
        session: &'a RpcSession<C>,
        request: &'a RequestSpec,
    ) -> BoxFuture<'a, Result<(StatusCode, String), TransportError>> {
        Box::pin(async move {
            let body = self
                .transport
                .invoke(&session.lease, &session.method, request.payload())
                .await?;
            Ok((StatusCode::OK, body))
        })
    }

    fn default_timeout(&self) -> Option<Duration> {
        self.timeout
    }
}
